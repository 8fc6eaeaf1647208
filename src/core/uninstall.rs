use indexmap::IndexMap;

use crate::types::ExecutableFile;

pub const UNINSTALL_LIBS_KEY: &str = "__uninstallLibs__";
pub const UNINSTALLER_LISTENERS_KEY: &str = "uninstallerListeners";
pub const UNINSTALLER_JARS_KEY: &str = "uninstallerJars";
pub const ROOT_SCRIPT_PREFIX: &str = "rootscript";

/// A listener (or helper jar) and the installer resources it needs at uninstall time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomData {
    pub listener_name: Option<String>,
    pub contents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdditionalData {
    /// Native library names copied from `native/<name>`.
    NativeLibs(Vec<String>),
    Custom(Vec<CustomData>),
    /// Written verbatim under its key.
    Bytes(Vec<u8>),
}

/// Everything the uninstaller needs to know about this installation.
#[derive(Debug, Clone, Default)]
pub struct UninstallData {
    files: Vec<String>,
    executables: Vec<ExecutableFile>,
    additional_data: IndexMap<String, AdditionalData>,
    uninstall_scripts: Vec<String>,
    uninstaller_jar_filename: Option<String>,
    uninstaller_path: Option<String>,
}

impl UninstallData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>) {
        self.files.push(path.into());
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.iter().any(|f| f == path)
    }

    pub fn add_executable(&mut self, executable: ExecutableFile) {
        self.executables.push(executable);
    }

    pub fn executables(&self) -> &[ExecutableFile] {
        &self.executables
    }

    pub fn add_additional_data(&mut self, key: impl Into<String>, data: AdditionalData) {
        self.additional_data.insert(key.into(), data);
    }

    pub fn additional_data(&self) -> &IndexMap<String, AdditionalData> {
        &self.additional_data
    }

    pub fn add_uninstall_script(&mut self, script: impl Into<String>) {
        self.uninstall_scripts.push(script.into());
    }

    pub fn uninstall_scripts(&self) -> &[String] {
        &self.uninstall_scripts
    }

    pub fn set_uninstaller_location(&mut self, jar: impl Into<String>, dir: impl Into<String>) {
        self.uninstaller_jar_filename = Some(jar.into());
        self.uninstaller_path = Some(dir.into());
    }

    pub fn uninstaller_jar_filename(&self) -> Option<&str> {
        self.uninstaller_jar_filename.as_deref()
    }

    pub fn uninstaller_path(&self) -> Option<&str> {
        self.uninstaller_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_keep_insertion_order() {
        let mut data = UninstallData::new();
        data.add_file("/opt/app/b");
        data.add_file("/opt/app/a");
        assert_eq!(data.files(), ["/opt/app/b", "/opt/app/a"]);
        assert!(data.contains_file("/opt/app/a"));
    }

    #[test]
    fn test_additional_data_replaces_by_key() {
        let mut data = UninstallData::new();
        data.add_additional_data("custom", AdditionalData::Bytes(vec![1]));
        data.add_additional_data(UNINSTALL_LIBS_KEY, AdditionalData::NativeLibs(vec![]));
        data.add_additional_data("custom", AdditionalData::Bytes(vec![2]));
        let keys: Vec<_> = data.additional_data().keys().cloned().collect();
        assert_eq!(keys, vec!["custom".to_string(), UNINSTALL_LIBS_KEY.to_string()]);
        assert_eq!(data.additional_data()["custom"], AdditionalData::Bytes(vec![2]));
    }
}
