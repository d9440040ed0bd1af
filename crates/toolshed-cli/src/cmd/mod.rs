//! One module per subcommand.

pub mod exec;
pub mod install;
pub mod list;
pub mod policy;
pub mod remove;
pub mod root_dir;
pub mod update_checksum;
pub mod versions;
pub mod which;
