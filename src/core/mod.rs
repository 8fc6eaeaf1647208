pub mod automation;
pub mod compile;
pub mod executor;
pub mod format;
pub mod handler;
pub mod interrupt;
pub mod process;
pub mod properties;
pub mod rules;
pub mod script_parser;
pub mod session;
pub mod substitutor;
pub mod uninstall;
pub mod uninstaller;
pub mod unpacker;
pub mod update_check;
pub mod volume;
