//! # Opcode
//!
//! An opcode here is a location in a module plus the bytes it should hold while a patch is on and while it's off.
//! Opcodes are declared relative to a module (see [`OpcodeDecl`]) and turned into absolute addresses by the
//! [`OpcodeCatalog`] once the module is loaded.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::module::{Module, ModuleResolver};
use crate::patcher::{CodePatcher, PatchError};

pub mod pattern;

/// Errors while turning declarations into absolute opcodes
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Declared module isn't loaded
    #[error("module {0} is not loaded")]
    ModuleNotLoaded(String),
    /// Patch would run past the end of the module
    #[error("{len} bytes at offset {offset:#x} lie outside of {library}")]
    OutOfBounds {
        /// Module the offset is relative to
        library: String,
        /// Declared offset
        offset: i128,
        /// Length of the patch
        len: usize,
    },
    /// Signature has no match in the module
    #[error("signature '{pattern}' not found in {library}")]
    PatternNotFound {
        /// Module that was scanned
        library: String,
        /// Signature that was searched for
        pattern: String,
    },
    /// Signature couldn't be parsed
    #[error("invalid signature: {0}")]
    InvalidPattern(String),
    /// Byte string couldn't be parsed
    #[error("invalid hex bytes '{0}'")]
    InvalidHex(String),
    /// On and off byte arrays differ in length
    #[error("on bytes ({on}) and off bytes ({off}) differ in length")]
    LengthMismatch {
        /// Length of the on bytes
        on: usize,
        /// Length of the off bytes
        off: usize,
    },
    /// Declaration needs to read module memory, and that failed
    #[error("unable to read module memory: {0}")]
    Read(#[from] PatchError),
}

/// A resolved (or unusable) patch location with its on and off bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    /// Absolute address, `None` if the declaration could not be resolved
    address: Option<usize>,
    /// Module the opcode was declared in
    pub library: String,
    /// Bytes written while the patch is enabled
    pub on_bytes: Vec<u8>,
    /// Bytes written while the patch is disabled
    pub off_bytes: Vec<u8>,
}

impl Opcode {
    /// Creates an opcode at an absolute address
    pub fn resolved(
        library: impl Into<String>,
        address: usize,
        on_bytes: Vec<u8>,
        off_bytes: Vec<u8>,
    ) -> Self {
        Self {
            address: Some(address),
            library: library.into(),
            on_bytes,
            off_bytes,
        }
    }

    /// Creates an opcode that will never be written
    pub fn unresolved(library: impl Into<String>, on_bytes: Vec<u8>, off_bytes: Vec<u8>) -> Self {
        Self {
            address: None,
            library: library.into(),
            on_bytes,
            off_bytes,
        }
    }

    /// Absolute address of the opcode
    pub fn address(&self) -> Option<usize> {
        self.address
    }

    /// Whether the opcode can be written
    pub fn is_usable(&self) -> bool {
        self.address.is_some() && self.on_bytes.len() == self.off_bytes.len()
    }

    /// Bytes for the given state
    pub fn bytes(&self, enabled: bool) -> &[u8] {
        if enabled {
            &self.on_bytes
        } else {
            &self.off_bytes
        }
    }
}

/// Ordered opcodes that make up one logical patch
pub type OpcodeSet = Vec<Opcode>;

/// Where an opcode lives inside its module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressDecl {
    /// Fixed offset from the module base
    Offset(u64),
    /// Wildcarded signature, `"0x…"` strings are read as offsets
    Pattern(String),
}

impl AddressDecl {
    /// Normalizes hex strings into offsets
    fn offset(&self) -> Option<u64> {
        match self {
            Self::Offset(offset) => Some(*offset),
            Self::Pattern(text) => {
                let text = text.trim();
                let hex = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
                u64::from_str_radix(hex, 16).ok()
            }
        }
    }
}

/// Declarative description of an opcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeDecl {
    /// Module name
    pub library: String,
    /// Offset or signature
    pub address: AddressDecl,
    /// Hex bytes for the enabled state
    pub on: String,
    /// Hex bytes for the disabled state. Leaving this out keeps whatever is there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off: Option<String>,
    /// Added to each signature match
    #[serde(default, skip_serializing_if = "is_zero")]
    pub offset: i64,
}

/// Skips serializing a zero displacement
fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl OpcodeDecl {
    /// Declares an opcode at a fixed offset
    pub fn at(library: impl Into<String>, offset: u64, on: &str, off: &str) -> Self {
        Self {
            library: library.into(),
            address: AddressDecl::Offset(offset),
            on: on.to_string(),
            off: Some(off.to_string()),
            offset: 0,
        }
    }

    /// Declares an opcode at every match of a signature
    pub fn pattern(library: impl Into<String>, pattern: &str, on: &str) -> Self {
        Self {
            library: library.into(),
            address: AddressDecl::Pattern(pattern.to_string()),
            on: on.to_string(),
            off: None,
            offset: 0,
        }
    }

    /// Sets the off bytes
    pub fn with_off(mut self, off: &str) -> Self {
        self.off = Some(off.to_string());
        self
    }

    /// Sets the displacement added to signature matches
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Parses the on and off bytes, making sure they're the same length
    fn byte_pair(&self) -> Result<(Vec<u8>, Option<Vec<u8>>), ResolveError> {
        let on = pattern::parse_hex(&self.on)?;
        let off = self.off.as_deref().map(pattern::parse_hex).transpose()?;
        if let Some(off) = &off {
            if off.len() != on.len() {
                return Err(ResolveError::LengthMismatch {
                    on: on.len(),
                    off: off.len(),
                });
            }
        }
        Ok((on, off))
    }
}

/// A single location in a module, such as a function to hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeTarget {
    /// Module name
    pub library: String,
    /// Offset or signature. Signatures resolve to their first match.
    pub address: AddressDecl,
    /// Added to the signature match
    #[serde(default, skip_serializing_if = "is_zero")]
    pub offset: i64,
}

impl CodeTarget {
    /// Target at a fixed offset
    pub fn at(library: impl Into<String>, offset: u64) -> Self {
        Self {
            library: library.into(),
            address: AddressDecl::Offset(offset),
            offset: 0,
        }
    }

    /// Target at the first match of a signature
    pub fn pattern(library: impl Into<String>, pattern: &str) -> Self {
        Self {
            library: library.into(),
            address: AddressDecl::Pattern(pattern.to_string()),
            offset: 0,
        }
    }

    /// Sets the displacement added to the signature match
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Turns opcode declarations into absolute opcodes
pub struct OpcodeCatalog<'a> {
    /// Where modules are looked up
    modules: &'a dyn ModuleResolver,
    /// Memory that signatures are scanned in
    memory: &'a dyn CodePatcher,
}

impl<'a> OpcodeCatalog<'a> {
    /// Catalog resolving against `modules`, scanning `memory`
    pub fn new(modules: &'a dyn ModuleResolver, memory: &'a dyn CodePatcher) -> Self {
        Self { modules, memory }
    }

    /// Looks up the module a declaration belongs to
    fn module(&self, decl: &OpcodeDecl) -> Result<Module, ResolveError> {
        self.modules
            .module(&decl.library)
            .ok_or_else(|| ResolveError::ModuleNotLoaded(decl.library.clone()))
    }

    /// Builds a single opcode from a fixed-offset declaration.
    ///
    /// Leaving out the off bytes captures whatever is currently at the address.
    pub fn read_opcode(&self, decl: &OpcodeDecl) -> Result<Opcode, ResolveError> {
        let offset = decl.address.offset().ok_or_else(|| {
            ResolveError::InvalidPattern(format!("{:?} is not an offset", decl.address))
        })?;
        let (on, off) = decl.byte_pair()?;
        let module = self.module(decl)?;
        let address = usize::try_from(offset)
            .ok()
            .and_then(|offset| module.resolve(offset, on.len()))
            .ok_or_else(|| ResolveError::OutOfBounds {
                library: decl.library.clone(),
                offset: offset as i128,
                len: on.len(),
            })?;
        let off = match off {
            Some(off) => off,
            None => self.memory.read(address, on.len())?,
        };
        Ok(Opcode::resolved(&decl.library, address, on, off))
    }

    /// Builds one opcode for every match of a signature declaration
    pub fn read_pattern(&self, decl: &OpcodeDecl) -> Result<Vec<Opcode>, ResolveError> {
        let AddressDecl::Pattern(signature) = &decl.address else {
            return Err(ResolveError::InvalidPattern(format!(
                "{:?} is not a signature",
                decl.address
            )));
        };
        let signature_bytes = pattern::parse_pattern(signature)?;
        let (on, off) = decl.byte_pair()?;
        let module = self.module(decl)?;
        let image = self.memory.read(module.base, module.size)?;

        let mut opcodes = Vec::new();
        for start in pattern::find_all(&image, &signature_bytes) {
            let offset = start as i128 + decl.offset as i128;
            let address = usize::try_from(offset)
                .ok()
                .and_then(|offset| module.resolve(offset, on.len()))
                .ok_or_else(|| ResolveError::OutOfBounds {
                    library: decl.library.clone(),
                    offset,
                    len: on.len(),
                })?;
            let off = match &off {
                Some(off) => off.clone(),
                None => {
                    let at = address - module.base;
                    image[at..at + on.len()].to_vec()
                }
            };
            opcodes.push(Opcode::resolved(&decl.library, address, on.clone(), off));
        }
        debug!(
            library = %decl.library,
            signature = %signature,
            matches = opcodes.len(),
            "scanned for signature"
        );
        Ok(opcodes)
    }

    /// Resolves any declaration. Signatures without a match are an error here.
    pub fn resolve(&self, decl: &OpcodeDecl) -> Result<Vec<Opcode>, ResolveError> {
        let AddressDecl::Pattern(pattern) = &decl.address else {
            return self.read_opcode(decl).map(|opcode| vec![opcode]);
        };
        if decl.address.offset().is_some() {
            return self.read_opcode(decl).map(|opcode| vec![opcode]);
        }
        let opcodes = self.read_pattern(decl)?;
        if opcodes.is_empty() {
            return Err(ResolveError::PatternNotFound {
                library: decl.library.clone(),
                pattern: pattern.clone(),
            });
        }
        Ok(opcodes)
    }

    /// Finds the absolute address of a single location
    pub fn locate(&self, target: &CodeTarget) -> Result<usize, ResolveError> {
        let module = self
            .modules
            .module(&target.library)
            .ok_or_else(|| ResolveError::ModuleNotLoaded(target.library.clone()))?;

        let relative = match (&target.address, target.address.offset()) {
            (_, Some(offset)) => offset as i128,
            (AddressDecl::Pattern(signature), None) => {
                let signature_bytes = pattern::parse_pattern(signature)?;
                let image = self.memory.read(module.base, module.size)?;
                let start = pattern::find_all(&image, &signature_bytes)
                    .first()
                    .copied()
                    .ok_or_else(|| ResolveError::PatternNotFound {
                        library: target.library.clone(),
                        pattern: signature.clone(),
                    })?;
                start as i128 + target.offset as i128
            }
            (AddressDecl::Offset(offset), None) => *offset as i128,
        };

        usize::try_from(relative)
            .ok()
            .and_then(|offset| module.resolve(offset, 1))
            .ok_or_else(|| ResolveError::OutOfBounds {
                library: target.library.clone(),
                offset: relative,
                len: 1,
            })
    }

    /// Resolves every declaration of a patch.
    ///
    /// On failure the whole set is returned unresolved, so the patch is never partially usable.
    pub fn resolve_set(&self, decls: &[OpcodeDecl]) -> Result<OpcodeSet, (OpcodeSet, ResolveError)> {
        let mut opcodes = Vec::with_capacity(decls.len());
        for decl in decls {
            match self.resolve(decl) {
                Ok(resolved) => opcodes.extend(resolved),
                Err(e) => {
                    warn!(library = %decl.library, error = %e, "unable to resolve opcode");
                    let unresolved = decls
                        .iter()
                        .map(|decl| {
                            let (on, off) = decl.byte_pair().unwrap_or_default();
                            let off = off.unwrap_or_else(|| on.clone());
                            Opcode::unresolved(&decl.library, on, off)
                        })
                        .collect();
                    return Err((unresolved, e));
                }
            }
        }
        Ok(opcodes)
    }
}
