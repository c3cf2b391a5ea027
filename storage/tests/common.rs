use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// 创建测试用的临时文件
pub fn create_test_file(name: &str, content: &[u8]) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(name);
    fs::write(&path, content).unwrap();
    (temp_dir, path)
}
