use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("pattern is empty")]
    EmptyPattern,
    #[error("invalid pattern byte '{0}'")]
    InvalidByte(String),
    #[error("module '{0}' not found")]
    ModuleNotFound(String),
}

/// Byte signature with wildcard positions, parsed from the conventional
/// "48 8B ?? 24" form. `??` and `?` both mean any byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl FromStr for Pattern {
    type Err = ScanError;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();
        for token in pattern.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(0x00);
                mask.push(false);
            } else {
                let byte = u8::from_str_radix(token, 16)
                    .map_err(|_| ScanError::InvalidByte(token.to_string()))?;
                bytes.push(byte);
                mask.push(true);
            }
        }
        if bytes.is_empty() {
            return Err(ScanError::EmptyPattern);
        }
        Ok(Self { bytes, mask })
    }
}

impl Pattern {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        if data.len() < self.bytes.len() {
            return false;
        }
        self.bytes
            .iter()
            .zip(&self.mask)
            .zip(data)
            .all(|((byte, must_match), value)| !must_match || byte == value)
    }

    /// Offset of the first match inside `region`, if any.
    pub fn find(&self, region: &[u8]) -> Option<usize> {
        if region.len() < self.bytes.len() {
            return None;
        }
        (0..=region.len() - self.bytes.len()).find(|&offset| self.matches(&region[offset..]))
    }
}

/// Resolve a relative call/jump operand: instruction address + instruction
/// size + the rel32 stored at `operand_offset`.
pub fn resolve_relative_address(
    instruction: usize,
    operand: i32,
    instruction_size: usize,
) -> usize {
    (instruction as i64 + instruction_size as i64 + operand as i64) as usize
}

/// Scan a module's image in the current process. Address-space walking only
/// exists in the live build; not-found disables the consumer's hook rather
/// than failing the plugin.
#[cfg(all(windows, feature = "host-d3d12"))]
pub fn find_in_module(module_name: Option<&str>, pattern: &Pattern) -> Option<usize> {
    use windows::Win32::System::LibraryLoader::GetModuleHandleA;
    use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
    use windows::Win32::System::Threading::GetCurrentProcess;
    use windows::core::PCSTR;

    let handle = unsafe {
        match module_name {
            Some(name) => {
                let mut bytes = name.as_bytes().to_vec();
                bytes.push(0);
                GetModuleHandleA(PCSTR(bytes.as_ptr()))
            }
            None => GetModuleHandleA(PCSTR::null()),
        }
    }
    .ok()?;

    let mut info = MODULEINFO::default();
    let ok = unsafe {
        GetModuleInformation(
            GetCurrentProcess(),
            handle,
            &mut info,
            std::mem::size_of::<MODULEINFO>() as u32,
        )
    };
    if ok.is_err() {
        return None;
    }

    let base = info.lpBaseOfDll as usize;
    let region = unsafe { std::slice::from_raw_parts(base as *const u8, info.SizeOfImage as usize) };
    pattern.find(region).map(|offset| base + offset)
}
