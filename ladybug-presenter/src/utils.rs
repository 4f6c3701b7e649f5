//! Startup I/O helpers: the shader file loader and SPIR-V module creation.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use ash::{util::read_spv, vk, Device};

use crate::error::PresenterError;

/// Reads a file into a byte buffer.
///
/// Distinguishes a missing file ([`PresenterError::FileNotFound`]) from a
/// file that turned out shorter than its reported size
/// ([`PresenterError::ReadIncomplete`]). Used once at startup for the shader
/// binary.
pub fn read_binary_file(path: &Path) -> Result<Vec<u8>, PresenterError> {
    let io_error = |source: std::io::Error| PresenterError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            PresenterError::FileNotFound(path.to_path_buf())
        } else {
            io_error(source)
        }
    })?;

    let expected = file.metadata().map_err(io_error)?.len();
    let mut bytes = Vec::with_capacity(expected as usize);
    file.read_to_end(&mut bytes).map_err(io_error)?;

    if bytes.len() as u64 != expected {
        return Err(PresenterError::ReadIncomplete {
            path: path.to_path_buf(),
            expected,
            read: bytes.len() as u64,
        });
    }

    Ok(bytes)
}

/// Validates a SPIR-V byte stream and returns its words.
pub fn spirv_words(spirv_bytes: &[u8]) -> Result<Vec<u32>, PresenterError> {
    let mut cursor = Cursor::new(spirv_bytes);
    read_spv(&mut cursor).map_err(|err| PresenterError::InvalidShader(err.to_string()))
}

/// Creates a shader module from a SPIR-V byte slice.
pub fn load_shader_module(
    device: &Device,
    spirv_bytes: &[u8],
) -> Result<vk::ShaderModule, PresenterError> {
    let code = spirv_words(spirv_bytes)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
    let module = unsafe { device.create_shader_module(&create_info, None)? };
    Ok(module)
}
