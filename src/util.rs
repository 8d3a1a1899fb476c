use std::path::Path;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

/// Reads a whole file into memory, naming the path in the error if it cannot be read
pub fn read_binary(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).wrap_err_with(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_contents() {
        let path = std::env::temp_dir().join(format!("kindle-read-binary-{}.bin", std::process::id()));
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07]).unwrap();

        let bytes = read_binary(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(bytes, vec![0x03, 0x02, 0x23, 0x07]);
    }

    #[test]
    fn missing_file_error_names_the_path() {
        let path = std::env::temp_dir().join("kindle-definitely-missing").join("shader.spv");
        let err = read_binary(&path).unwrap_err();
        assert!(format!("{}", err).contains("shader.spv"));
    }
}
