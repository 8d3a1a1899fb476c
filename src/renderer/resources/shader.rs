use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use crate::util::read_binary;

/// Where the build script writes compiled SPIR-V
pub const SHADERS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders-built");

/// A compiled shader module holding every entry point of one source file
pub struct Shader {
    pub module: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl Shader {
    /// Loads `shaders-built/<name>.spv`
    pub fn load(name: &str, device: Arc<ash::Device>) -> Result<Self> {
        Self::from_path(shader_path(name), device)
    }

    pub fn from_path(path: impl AsRef<Path>, device: Arc<ash::Device>) -> Result<Self> {
        let module = load_shader_module(path.as_ref(), &device)?;
        Ok(Self { module, device })
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

pub fn shader_path(name: &str) -> PathBuf {
    Path::new(SHADERS_DIR).join(format!("{}.spv", name))
}

pub fn load_shader_module(path: &Path, device: &ash::Device) -> Result<vk::ShaderModule> {
    let code = read_binary(path)?;
    let words = spirv_words(&code)
        .wrap_err_with(|| format!("{} is not a SPIR-V binary", path.display()))?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&words);
    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    Ok(shader_module)
}

/// Reinterprets raw bytes as SPIR-V words, checking size and magic number
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    Ok(ash::util::read_spv(&mut Cursor::new(bytes))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_words_are_accepted() {
        let mut bytes = Vec::new();
        for word in [0x0723_0203u32, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn truncated_binary_is_rejected() {
        assert!(spirv_words(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn shader_paths_point_into_build_output() {
        let path = shader_path("triangle");
        assert!(path.ends_with("shaders-built/triangle.spv"));
    }
}
