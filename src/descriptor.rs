//! Access to the component descriptor passed to the watched calls.
//!
//! Both `do_init_module` and `free_module` take a `struct module *` as their
//! first argument. The only field the dispatcher needs is `name`, a fixed
//! size, NUL terminated array at the end of the module header.

/// Size of `struct module::name` (`64 - sizeof(unsigned long)`).
pub const MODULE_NAME_LEN: usize = 64 - core::mem::size_of::<usize>();

/// The first argument was null, unterminated, or not valid UTF-8.
///
/// Treated as "no match" by the entry dispatcher and never propagated further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentUnreadable;

impl core::fmt::Display for ArgumentUnreadable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Component descriptor argument unreadable")
    }
}

impl core::error::Error for ArgumentUnreadable {}

/// Read-only view of a watched call's arguments.
pub trait CallArgs {
    /// Declared name of the component passed as the first argument.
    fn component_name(&self) -> Result<&str, ArgumentUnreadable>;
}

/// Decode a NUL terminated module name field.
pub fn module_name(field: &[u8]) -> Result<&str, ArgumentUnreadable> {
    let len = field
        .iter()
        .position(|&b| b == 0)
        .ok_or(ArgumentUnreadable)?;
    core::str::from_utf8(&field[..len]).map_err(|_| ArgumentUnreadable)
}

/// Arguments of a module load/unload call as captured from registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleArgs<'a> {
    name_field: Option<&'a [u8]>,
}

impl<'a> ModuleArgs<'a> {
    /// Arguments whose first parameter has the given `name` field.
    pub fn new(name_field: &'a [u8]) -> Self {
        Self {
            name_field: Some(name_field),
        }
    }

    /// Arguments with a null or otherwise missing module pointer.
    pub fn empty() -> Self {
        Self { name_field: None }
    }

    /// Build from the raw `struct module *` in the first argument register.
    ///
    /// # Safety
    /// `module` must be null or point to a live `struct module` whose `name`
    /// array starts `name_offset` bytes into the structure and stays valid
    /// for `'a`.
    pub unsafe fn from_raw(module: *const u8, name_offset: usize) -> Self {
        if module.is_null() {
            return Self::empty();
        }
        let field =
            unsafe { core::slice::from_raw_parts(module.add(name_offset), MODULE_NAME_LEN) };
        Self::new(field)
    }
}

impl CallArgs for ModuleArgs<'_> {
    fn component_name(&self) -> Result<&str, ArgumentUnreadable> {
        module_name(self.name_field.ok_or(ArgumentUnreadable)?)
    }
}

impl CallArgs for Option<&str> {
    fn component_name(&self) -> Result<&str, ArgumentUnreadable> {
        (*self).ok_or(ArgumentUnreadable)
    }
}
