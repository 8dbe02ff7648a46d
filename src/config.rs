//! Command line and mount-option handling for the `wd_bridge` binary.
//!
//! Credentials and the device id arrive the classic FUSE way, inside `-o`:
//! `wd_bridge -f <mount_point> -ouser=<username>,pass=<password>,host=<device_id>`.
//! Anything in `-o` that the bridge does not consume is passed through to
//! the FUSE host untouched.

use std::path::PathBuf;

use clap::Parser;
use fuser::MountOption;

pub const USAGE: &str =
    "Usage: wd_bridge -f <mount_point> -ouser=<username>,pass=<password>,host=<device_id>";

#[derive(Debug, Parser)]
#[command(name = "wd_bridge")]
pub struct Cli {
    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Where to mount the remote device.
    pub mount_point: PathBuf,

    /// Mount options, comma separated; may be given more than once.
    #[arg(short = 'o', value_name = "OPTIONS")]
    pub options: Vec<String>,
}

/// The bridge's own settings, pulled out of the `-o` option string.
#[derive(Debug, PartialEq, Eq)]
pub struct MountConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    /// `-o` entries the bridge does not understand; forwarded to FUSE.
    pub passthrough: Vec<String>,
}

impl MountConfig {
    pub fn parse(options: &[String]) -> Result<Self, String> {
        let mut username = None;
        let mut password = None;
        let mut host = None;
        let mut passthrough = Vec::new();

        for group in options {
            for opt in group.split(',').filter(|o| !o.is_empty()) {
                if let Some(value) = opt.strip_prefix("user=") {
                    username = Some(value.to_string());
                } else if let Some(value) = opt.strip_prefix("pass=") {
                    password = Some(value.to_string());
                } else if let Some(value) = opt.strip_prefix("host=") {
                    host = Some(value.to_string());
                } else {
                    passthrough.push(opt.to_string());
                }
            }
        }

        Ok(Self {
            username: username.ok_or("missing required mount option 'user='")?,
            password: password.ok_or("missing required mount option 'pass='")?,
            host: host.ok_or("missing required mount option 'host='")?,
            passthrough,
        })
    }

    /// Options handed to the FUSE host: a fixed fsname plus everything the
    /// user passed through.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName("wd_bridge".to_string()),
            MountOption::AutoUnmount,
        ];
        for opt in &self.passthrough {
            options.push(match opt.as_str() {
                "allow_other" => MountOption::AllowOther,
                "allow_root" => MountOption::AllowRoot,
                "ro" => MountOption::RO,
                other => MountOption::CUSTOM(other.to_string()),
            });
        }
        options
    }
}
