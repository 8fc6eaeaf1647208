use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// OS filter attached to packs, files and jobs. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsConstraint {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverridePolicy {
    False,
    True,
    AskFalse,
    AskTrue,
    Update,
}

impl OverridePolicy {
    pub fn tag(self) -> u8 {
        match self {
            OverridePolicy::False => 0,
            OverridePolicy::True => 1,
            OverridePolicy::AskFalse => 2,
            OverridePolicy::AskTrue => 3,
            OverridePolicy::Update => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => OverridePolicy::False,
            1 => OverridePolicy::True,
            2 => OverridePolicy::AskFalse,
            3 => OverridePolicy::AskTrue,
            4 => OverridePolicy::Update,
            _ => return None,
        })
    }
}

/// Points at a file of an earlier pack holding identical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackReference {
    pub pack: u32,
    pub file: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackFile {
    pub target_path: String,
    pub length: u64,
    /// Milliseconds since the epoch, negative when unknown.
    pub mtime: i64,
    pub mode: u32,
    pub override_policy: OverridePolicy,
    pub directory: bool,
    pub os_constraints: Vec<OsConstraint>,
    pub condition: Option<String>,
    pub back_reference: Option<BackReference>,
    pub loose_source: Option<String>,
    /// Absolute offset of the payload in the spanning volume stream.
    pub archive_position: u64,
}

impl PackFile {
    pub fn new(target_path: impl Into<String>, length: u64) -> Self {
        PackFile {
            target_path: target_path.into(),
            length,
            mtime: -1,
            mode: 0,
            override_policy: OverridePolicy::Update,
            directory: false,
            os_constraints: Vec::new(),
            condition: None,
            back_reference: None,
            loose_source: None,
            archive_position: 0,
        }
    }

    pub fn is_back_reference(&self) -> bool {
        self.back_reference.is_some()
    }

    /// Whether a single-archive pack stream carries this entry's bytes inline.
    pub fn has_inline_payload(&self) -> bool {
        !self.directory && !self.is_back_reference() && self.loose_source.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsableFile {
    pub path: String,
    pub substitution_type: String,
    pub encoding: Option<String>,
    pub os_constraints: Vec<OsConstraint>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    Bin,
    Jar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    PostInstall,
    Never,
    Uninstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    Warn,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableFile {
    pub path: String,
    pub kind: ExecutableKind,
    pub main_class: Option<String>,
    pub stage: ExecutionStage,
    pub on_failure: FailurePolicy,
    pub args: Vec<String>,
    pub keep_file: bool,
    pub os_constraints: Vec<OsConstraint>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateCheck {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub os: Vec<OsConstraint>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub loose: bool,
    #[serde(default = "default_true")]
    pub preselected: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerKind {
    #[default]
    Standard,
    Web,
    Multivolume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default = "default_uninstaller_name")]
    pub uninstaller_name: String,
    #[serde(default = "default_uninstaller_path")]
    pub uninstaller_path: String,
    #[serde(default)]
    pub uninstaller_condition: Option<String>,
    #[serde(default)]
    pub privileged_uninstall: bool,
}

fn default_uninstaller_name() -> String {
    "uninstaller.jar".to_string()
}

fn default_uninstaller_path() -> String {
    "$INSTALL_PATH/Uninstaller".to_string()
}

impl Default for Info {
    fn default() -> Self {
        Info {
            app_name: String::new(),
            app_version: String::new(),
            uninstaller_name: default_uninstaller_name(),
            uninstaller_path: default_uninstaller_path(),
            uninstaller_condition: None,
            privileged_uninstall: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConditionSpec {
    Variable { name: String, value: String },
    Exists { name: String },
    And { conditions: Vec<String> },
    Or { conditions: Vec<String> },
    Not { condition: String },
    Const { value: bool },
}

/// The `install.json` document at the root of an installer directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallManifest {
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub kind: InstallerKind,
    #[serde(default)]
    pub packs: Vec<Pack>,
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    #[serde(default)]
    pub conditions: IndexMap<String, ConditionSpec>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub default_install_path: Option<String>,
    #[serde(default)]
    pub pack_encoding: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub process: Option<crate::core::process::ProcessSpec>,
    #[serde(default)]
    pub compile: Option<crate::core::compile::CompileSpec>,
    #[serde(default)]
    pub uninstaller: UninstallerResources,
}

/// An uninstaller listener and the installer resources it is loaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UninstallerListenerSpec {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// What the uninstaller carries besides the install log.
///
/// Resource paths are relative to the installer directory. Values of `data` and
/// `scripts` are substituted before they are stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UninstallerResources {
    /// Library names under `native/`.
    #[serde(default)]
    pub native_libs: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<UninstallerListenerSpec>,
    #[serde(default)]
    pub jars: Vec<String>,
    /// Shell scripts run as root by the uninstaller.
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Extra entries written verbatim under their key.
    #[serde(default)]
    pub data: IndexMap<String, String>,
}

fn default_locale() -> String {
    "eng".to_string()
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub installer: PathBuf,
    pub target: Option<PathBuf>,
    pub packs: Vec<String>,
    pub variables: Vec<(String, String)>,
    pub properties: Option<PathBuf>,
    pub automated: bool,
    pub assume_yes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UninstallerSummary {
    pub install_path: String,
    pub files: Vec<String>,
    pub jar_location: Vec<String>,
    pub executables: usize,
    pub entries: Vec<String>,
}
