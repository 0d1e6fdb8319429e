//! Compiled-function cache artifact
//!
//! Units are closures and cannot be serialised directly, so the artifact
//! stores each unit's post-customisation IR keyed by entry address.
//! Loading regenerates the units. A CRC32 of the code regions ties the
//! artifact to the cartridge image it was built from.

use std::io::{Read, Write};

use bincode::Options;
use log::info;
use serde::{Deserialize, Serialize};

use crate::decompiler::CodeRegion;
use crate::error::{JitError, Result};
use crate::translator::ConvertedInstruction;

use super::JitCompiler;

const CACHE_MAGIC: [u8; 4] = *b"NJIT";
const CACHE_VERSION: u32 = 1;

/// Upper bound on the bytes one artifact may decode from
pub const CACHE_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

/// Fixed-width integers, little endian, reads capped at `limit`
fn codec(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(limit)
}

fn decode_artifact<R: Read>(reader: R, limit: u64) -> Result<CacheArtifact> {
    Ok(codec(limit).deserialize_from(reader)?)
}

#[derive(Serialize, Deserialize, Debug)]
struct CacheHeader {
    magic: [u8; 4],
    version: u32,
    regions_crc: u32,
}

#[derive(Serialize, Deserialize, Debug)]
struct PersistedFunction {
    entry: u16,
    instructions: Vec<ConvertedInstruction>,
}

#[derive(Serialize, Deserialize, Debug)]
struct CacheArtifact {
    header: CacheHeader,
    functions: Vec<PersistedFunction>,
}

/// CRC32 over every region's base address and bytes, in order
pub fn regions_checksum(regions: &[CodeRegion]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for region in regions {
        hasher.update(&region.base_address.to_le_bytes());
        hasher.update(&region.bytes);
    }
    hasher.finalize()
}

impl JitCompiler {
    /// Write every cached unit; returns how many were written
    pub fn save_cache<W: Write>(&self, writer: W) -> Result<usize> {
        let functions: Vec<PersistedFunction> = self
            .compiled_entries()
            .into_iter()
            .filter_map(|entry| self.get(entry))
            .map(|function| PersistedFunction {
                entry: function.entry(),
                instructions: function.instructions().to_vec(),
            })
            .collect();

        let artifact = CacheArtifact {
            header: CacheHeader {
                magic: CACHE_MAGIC,
                version: CACHE_VERSION,
                regions_crc: regions_checksum(self.code_regions()),
            },
            functions,
        };

        codec(CACHE_SIZE_LIMIT).serialize_into(writer, &artifact)?;
        info!("saved {} compiled functions", artifact.functions.len());
        Ok(artifact.functions.len())
    }

    /// Regenerate units from an artifact; entries already cached are kept.
    /// Returns how many units were added.
    pub fn load_cache<R: Read>(&self, reader: R) -> Result<usize> {
        let artifact = decode_artifact(reader, CACHE_SIZE_LIMIT)?;
        let header = &artifact.header;

        if header.magic != CACHE_MAGIC {
            return Err(JitError::CacheMismatch("bad magic".to_string()));
        }
        if header.version != CACHE_VERSION {
            return Err(JitError::CacheMismatch(format!(
                "version {} (expected {})",
                header.version, CACHE_VERSION
            )));
        }
        let expected = regions_checksum(self.code_regions());
        if header.regions_crc != expected {
            return Err(JitError::CacheMismatch(format!(
                "built for code CRC {:08X}, loaded image is {:08X}",
                header.regions_crc, expected
            )));
        }

        let mut added = 0;
        for persisted in artifact.functions {
            if self.is_compiled(persisted.entry) {
                continue;
            }
            let function = self.compile_ir(persisted.entry, persisted.instructions)?;
            if self.insert(function) {
                added += 1;
            }
        }
        info!("loaded {} compiled functions", added);
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_depends_on_base() {
        let a = vec![CodeRegion::new(0x8000, vec![1, 2, 3])];
        let b = vec![CodeRegion::new(0xC000, vec![1, 2, 3])];
        assert_ne!(regions_checksum(&a), regions_checksum(&b));
    }

    #[test]
    fn test_rejects_other_image() {
        let source = JitCompiler::new(vec![CodeRegion::new(0x8000, vec![0x60])]);
        source.get_or_compile(0x8000).unwrap();
        let mut buffer = Vec::new();
        source.save_cache(&mut buffer).unwrap();

        let other = JitCompiler::new(vec![CodeRegion::new(0x8000, vec![0x40])]);
        let err = other.load_cache(buffer.as_slice()).unwrap_err();
        assert!(matches!(err, JitError::CacheMismatch(_)));
    }

    #[test]
    fn test_garbage_is_format_error() {
        let jit = JitCompiler::new(Vec::new());
        let err = jit.load_cache(&[0xFFu8, 0xFF][..]).unwrap_err();
        assert!(matches!(err, JitError::CacheFormat(_)));
    }

    #[test]
    fn test_huge_length_prefix_is_format_error() {
        let jit = JitCompiler::new(Vec::new());
        let mut artifact = Vec::new();
        artifact.extend_from_slice(&CACHE_MAGIC);
        artifact.extend_from_slice(&CACHE_VERSION.to_le_bytes());
        artifact.extend_from_slice(&regions_checksum(&[]).to_le_bytes());
        artifact.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = jit.load_cache(artifact.as_slice()).unwrap_err();
        assert!(matches!(err, JitError::CacheFormat(_)));
    }

    #[test]
    fn test_oversized_artifact_hits_limit() {
        let source = JitCompiler::new(vec![CodeRegion::new(0x8000, vec![0xE8, 0xC8, 0x60])]);
        source.get_or_compile(0x8000).unwrap();
        let mut buffer = Vec::new();
        source.save_cache(&mut buffer).unwrap();

        assert!(decode_artifact(buffer.as_slice(), CACHE_SIZE_LIMIT).is_ok());
        let err = decode_artifact(buffer.as_slice(), 16).unwrap_err();
        match err {
            JitError::CacheFormat(inner) => assert!(matches!(*inner, bincode::ErrorKind::SizeLimit)),
            other => panic!("unexpected error: {}", other),
        }
    }
}
