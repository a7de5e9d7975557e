//! Embedded shaders for the Keel renderer.
//!
//! GLSL sources under `shaders/` are compiled at build time by
//! `keel-shaderc` into named byte arrays (`<name>_<stage>_spv`) and length
//! constants (`<name>_<stage>_spv_len`). The renderer only ever sees them
//! through [`ShaderArtifact`].

use thiserror::Error;

/// Generated arrays, one pair of constants per shader source.
pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/shaders.rs"));
}

/// SPIR-V magic number (first word of every module).
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reasons an embedded artifact cannot be turned into a shader module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("shader '{0}' is empty (was a shader compiler available at build time?)")]
    Empty(&'static str),

    #[error("shader '{name}' declares {declared} bytes but embeds {actual}")]
    LengthMismatch {
        name: &'static str,
        declared: u32,
        actual: usize,
    },

    #[error("shader '{name}' is {len} bytes, not a multiple of 4")]
    Misaligned { name: &'static str, len: usize },

    #[error("shader '{name}' has bad magic number {found:#010x}")]
    BadMagic { name: &'static str, found: u32 },
}

/// A compiled shader embedded in the binary.
#[derive(Debug, Clone, Copy)]
pub struct ShaderArtifact {
    /// Source file name, e.g. `simple.vert`.
    pub name: &'static str,
    /// Raw SPIR-V bytes (not necessarily 4-byte aligned in memory).
    pub bytes: &'static [u8],
    /// Length constant emitted next to the array.
    pub declared_len: u32,
}

impl ShaderArtifact {
    pub const fn new(name: &'static str, bytes: &'static [u8], declared_len: u32) -> Self {
        Self {
            name,
            bytes,
            declared_len,
        }
    }

    /// Check length, alignment and magic number.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        let len = self.bytes.len();
        if len == 0 {
            return Err(ArtifactError::Empty(self.name));
        }
        if usize::try_from(self.declared_len).ok() != Some(len) {
            return Err(ArtifactError::LengthMismatch {
                name: self.name,
                declared: self.declared_len,
                actual: len,
            });
        }
        if len % 4 != 0 {
            return Err(ArtifactError::Misaligned {
                name: self.name,
                len,
            });
        }
        let found = u32::from_le_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]);
        if found != SPIRV_MAGIC {
            return Err(ArtifactError::BadMagic {
                name: self.name,
                found,
            });
        }
        Ok(())
    }

    /// Validated bytecode as aligned words for `vkCreateShaderModule`.
    pub fn words(&self) -> Result<Vec<u32>, ArtifactError> {
        self.validate()?;
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

macro_rules! artifacts {
    ($($fn_name:ident => $file:literal, $array:ident, $len:ident;)*) => {
        $(
            #[doc = concat!("`", $file, "` compiled to SPIR-V.")]
            pub fn $fn_name() -> ShaderArtifact {
                ShaderArtifact::new($file, &generated::$array, generated::$len)
            }
        )*

        /// Every embedded shader, in source order.
        pub fn all() -> Vec<ShaderArtifact> {
            vec![$($fn_name()),*]
        }
    };
}

artifacts! {
    simple_vert => "simple.vert", simple_vert_spv, simple_vert_spv_len;
    simple_frag => "simple.frag", simple_frag_spv, simple_frag_spv_len;
    terrain_vert => "terrain.vert", terrain_vert_spv, terrain_vert_spv_len;
    terrain_frag => "terrain.frag", terrain_frag_spv, terrain_frag_spv_len;
    fullscreen_vert => "fullscreen.vert", fullscreen_vert_spv, fullscreen_vert_spv_len;
    fullscreen_frag => "fullscreen.frag", fullscreen_frag_spv, fullscreen_frag_spv_len;
}

#[cfg(test)]
mod tests {
    use super::*;

    static MODULE: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

    #[test]
    fn valid_module_converts_to_words() {
        let artifact = ShaderArtifact::new("ok.vert", &MODULE, 8);
        assert_eq!(artifact.words().unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_empty() {
        let artifact = ShaderArtifact::new("none.frag", &[], 0);
        assert_eq!(artifact.validate(), Err(ArtifactError::Empty("none.frag")));
    }

    #[test]
    fn rejects_length_mismatch() {
        let artifact = ShaderArtifact::new("short.vert", &MODULE, 12);
        assert!(matches!(
            artifact.validate(),
            Err(ArtifactError::LengthMismatch { declared: 12, actual: 8, .. })
        ));
    }

    #[test]
    fn rejects_misaligned() {
        let artifact = ShaderArtifact::new("odd.vert", &MODULE[..6], 6);
        assert!(matches!(
            artifact.validate(),
            Err(ArtifactError::Misaligned { len: 6, .. })
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        static GARBAGE: [u8; 4] = [1, 2, 3, 4];
        let artifact = ShaderArtifact::new("junk.frag", &GARBAGE, 4);
        assert!(matches!(
            artifact.validate(),
            Err(ArtifactError::BadMagic { found: 0x0403_0201, .. })
        ));
    }

    #[test]
    fn embedded_shaders_are_consistent() {
        for artifact in all() {
            assert_eq!(artifact.bytes.len(), artifact.declared_len as usize);
            // Empty when built without a compiler.
            if !artifact.bytes.is_empty() {
                artifact.validate().unwrap();
                assert!(artifact.bytes.len() > 20, "{} too small", artifact.name);
            }
        }
    }
}
