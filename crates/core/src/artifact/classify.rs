//! # Platform Classifier
//!
//! Decides which platform family an artifact belongs to from its binary
//! signature. The file extension is consulted only when the signature is
//! inconclusive, and a short text sniff comes last.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Bytes read from the head of the file for signature and text checks
const SNIFF_LEN: usize = 4096;

/// Platform/category label attached to an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Windows,
    Linux,
    Script,
    Bytecode,
    Unknown,
}

impl Classification {
    /// Native executables, the only targets dynamic probing can run
    pub fn is_native(self) -> bool {
        matches!(self, Classification::Windows | Classification::Linux)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Windows => "windows",
            Classification::Linux => "linux",
            Classification::Script => "script",
            Classification::Bytecode => "bytecode",
            Classification::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the file at `path`.
///
/// Never fails: unreadable files are `Unknown`.
pub fn classify(path: &Path) -> Classification {
    let head = match read_head(path) {
        Ok(head) => head,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Artifact unreadable, classification unknown");
            return Classification::Unknown;
        }
    };

    classify_signature(&head)
        .or_else(|| classify_extension(path))
        .or_else(|| classify_text(&head))
        .unwrap_or(Classification::Unknown)
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Magic-byte inspection
pub fn classify_signature(head: &[u8]) -> Option<Classification> {
    if head.starts_with(b"\x7fELF") {
        return Some(Classification::Linux);
    }
    if head.starts_with(b"MZ") {
        if !has_pe_header(head) {
            tracing::debug!("MZ stub without a PE header, treating as windows");
        }
        return Some(Classification::Windows);
    }
    if head.starts_with(b"\0asm") {
        return Some(Classification::Bytecode);
    }
    if is_java_class(head) || is_python_bytecode(head) {
        return Some(Classification::Bytecode);
    }
    if head.starts_with(b"#!") {
        return Some(Classification::Script);
    }
    None
}

/// `PE\0\0` at the offset stored in the DOS header's `e_lfanew` field
pub fn has_pe_header(head: &[u8]) -> bool {
    let Some(field) = head.get(0x3C..0x40) else {
        return false;
    };
    let offset = u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize;
    offset
        .checked_add(4)
        .and_then(|end| head.get(offset..end))
        .is_some_and(|sig| sig == b"PE\0\0")
}

/// `0xCAFEBABE` is shared with Mach-O fat binaries; those carry a small arch count
/// where class files carry a major version of at least 45.
fn is_java_class(head: &[u8]) -> bool {
    if head.len() < 8 || !head.starts_with(&[0xCA, 0xFE, 0xBA, 0xBE]) {
        return false;
    }
    let major = u16::from_be_bytes([head[6], head[7]]);
    major >= 45
}

/// CPython `.pyc`: a little-endian magic number followed by `\r\n`
fn is_python_bytecode(head: &[u8]) -> bool {
    if head.len() < 16 || head[2] != b'\r' || head[3] != b'\n' {
        return false;
    }
    let magic = u16::from_le_bytes([head[0], head[1]]);
    (3000..=4000).contains(&magic) || magic == 62211
}

/// Fallback on the file extension
pub fn classify_extension(path: &Path) -> Option<Classification> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "exe" | "dll" | "sys" => Some(Classification::Windows),
        "elf" | "so" | "bin" => Some(Classification::Linux),
        "js" | "mjs" | "py" | "sh" | "ps1" | "rb" | "pl" | "php" => Some(Classification::Script),
        "wasm" | "class" | "pyc" => Some(Classification::Bytecode),
        _ => None,
    }
}

/// Last resort: UTF-8 text that looks like JavaScript
fn classify_text(head: &[u8]) -> Option<Classification> {
    let text = std::str::from_utf8(head).ok()?;
    const MARKERS: &[&str] = &["function", "=>", "var ", "const ", "let "];
    MARKERS
        .iter()
        .any(|m| text.contains(m))
        .then_some(Classification::Script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_elf_is_linux() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "target", b"\x7fELF\x02\x01\x01\0\0\0\0\0");
        assert_eq!(classify(&path), Classification::Linux);
    }

    #[test]
    fn test_pe_is_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"MZ\x90\0".to_vec();
        bytes.resize(128, 0);
        let path = write(dir.path(), "target", &bytes);
        assert_eq!(classify(&path), Classification::Windows);
    }

    #[test]
    fn test_pe_header_located_via_e_lfanew() {
        let mut bytes = b"MZ".to_vec();
        bytes.resize(0x80, 0);
        bytes[0x3C..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        assert!(!has_pe_header(&bytes));

        bytes[0x40..0x44].copy_from_slice(b"PE\0\0");
        assert!(has_pe_header(&bytes));
        assert_eq!(classify_signature(&bytes), Some(Classification::Windows));

        // offset pointing past the sniffed head
        bytes[0x3C..0x40].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(!has_pe_header(&bytes));
        assert!(!has_pe_header(b"MZ"));
    }

    #[test]
    fn test_wasm_and_class_are_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let wasm = write(dir.path(), "mod", b"\0asm\x01\0\0\0");
        assert_eq!(classify(&wasm), Classification::Bytecode);

        let class = write(dir.path(), "Main", &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52]);
        assert_eq!(classify(&class), Classification::Bytecode);
    }

    #[test]
    fn test_fat_macho_is_not_bytecode() {
        assert_eq!(
            classify_signature(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 2]),
            None
        );
    }

    #[test]
    fn test_shebang_is_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "run", b"#!/bin/sh\necho hi\n");
        assert_eq!(classify(&path), Classification::Script);
    }

    #[test]
    fn test_signature_beats_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "lying.exe", b"\x7fELF\x02\x01\x01\0");
        assert_eq!(classify(&path), Classification::Linux);
    }

    #[test]
    fn test_extension_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "payload.js", &[0xff, 0xfe, 0x00, 0x01]);
        assert_eq!(classify(&path), Classification::Script);
    }

    #[test]
    fn test_text_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "download", b"const x = () => eval(input);");
        assert_eq!(classify(&path), Classification::Script);
    }

    #[test]
    fn test_unreadable_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            classify(&dir.path().join("does-not-exist")),
            Classification::Unknown
        );
    }

    #[test]
    fn test_opaque_bytes_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "blob", &[0x00, 0x9f, 0xff, 0x13, 0x37]);
        assert_eq!(classify(&path), Classification::Unknown);
    }

    #[test]
    fn test_same_content_same_classification() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a", b"\x7fELF\x01");
        let b = write(dir.path(), "b", b"\x7fELF\x01");
        assert_eq!(classify(&a), classify(&a));
        assert_eq!(classify(&a), classify(&b));
    }
}
