//! # Module
//!
//! Loaded modules provide the base addresses that declared offsets are resolved against.

/// A loaded binary image of the host process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// File name the module was loaded under, e.g. `libcocos2d.dll`
    pub name: String,
    /// Address the module is mapped at
    pub base: usize,
    /// Size of the mapped image
    pub size: usize,
}

impl Module {
    /// Module `name` mapped at `base`
    pub fn new(name: impl Into<String>, base: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            base,
            size,
        }
    }

    /// Absolute address of `offset`, if `len` bytes starting there stay inside the module
    pub fn resolve(&self, offset: usize, len: usize) -> Option<usize> {
        let end = offset.checked_add(len)?;
        if end > self.size || len == 0 {
            return None;
        }
        self.base.checked_add(offset)
    }
}

/// Looks up loaded modules by name
pub trait ModuleResolver {
    /// Returns the module loaded under `name`. Names compare case-insensitively.
    fn module(&self, name: &str) -> Option<Module>;
}

/// Fixed table of modules
#[derive(Debug, Default, Clone)]
pub struct ModuleTable {
    /// Known modules, unique by name
    modules: Vec<Module>,
}

impl ModuleTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module to the table
    pub fn with(mut self, module: Module) -> Self {
        self.insert(module);
        self
    }

    /// Adds a module, replacing any module with the same name
    pub fn insert(&mut self, module: Module) {
        self.modules
            .retain(|m| !m.name.eq_ignore_ascii_case(&module.name));
        self.modules.push(module);
    }
}

impl ModuleResolver for ModuleTable {
    fn module(&self, name: &str) -> Option<Module> {
        self.modules
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// Resolves modules loaded into the current process.
///
/// An empty name resolves to the main executable.
#[cfg(target_os = "windows")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessModules;

#[cfg(target_os = "windows")]
impl ModuleResolver for ProcessModules {
    fn module(&self, name: &str) -> Option<Module> {
        use windows::core::PCWSTR;
        use windows::Win32::System::LibraryLoader::GetModuleHandleW;
        use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
        use windows::Win32::System::Threading::GetCurrentProcess;

        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let module_name = if name.is_empty() {
            PCWSTR::null()
        } else {
            PCWSTR(wide.as_ptr())
        };

        unsafe {
            let handle = GetModuleHandleW(module_name).ok()?;
            let mut info = MODULEINFO::default();
            GetModuleInformation(
                GetCurrentProcess(),
                handle,
                &mut info,
                std::mem::size_of::<MODULEINFO>() as u32,
            )
            .ok()?;
            Some(Module::new(
                name,
                info.lpBaseOfDll as usize,
                info.SizeOfImage as usize,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_bounds() {
        let module = Module::new("game.exe", 0x400000, 0x1000);
        assert_eq!(module.resolve(0x10, 2), Some(0x400010));
        assert_eq!(module.resolve(0xffe, 2), Some(0x400ffe));
        assert_eq!(module.resolve(0xfff, 2), None);
        assert_eq!(module.resolve(usize::MAX, 2), None);
        assert_eq!(module.resolve(0x10, 0), None);
    }

    #[test]
    fn test_table_lookup_ignores_case() {
        let table = ModuleTable::new()
            .with(Module::new("libcocos2d.dll", 0x1000_0000, 0x10_0000))
            .with(Module::new("GeometryDash.exe", 0x400000, 0x1000));

        assert_eq!(table.module("LIBCOCOS2D.DLL").unwrap().base, 0x1000_0000);
        assert!(table.module("fmod.dll").is_none());
    }
}
