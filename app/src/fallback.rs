use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use storage::acl::SID_EVERYONE;
use storage::error::{AclError, AclResult};
use thiserror::Error;
use tokio::process::Command;
use utils::app_config::FallbackConfig;

use crate::policy::AccessPolicy;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 无法直接替换ACL时使用的提权路径
///
/// 只报告成功或失败；工具实际改了什么由下一次检查得出。
#[async_trait]
pub trait PrivilegedTool: Send + Sync {
    /// 用于日志的可读命令行
    fn describe(&self, path: &Path, target: AccessPolicy) -> String;

    async fn run(&self, path: &Path, target: AccessPolicy) -> AclResult<()>;
}

/// 外部程序的参数约定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFlavor {
    /// `icacls <path> /inheritance:r /grant:r *S-1-1-0:(RX|F)`，以当前令牌运行
    Icacls,
    /// 同样的 icacls 调用，经 PowerShell `Start-Process -Verb RunAs` 提权，退出码透传
    ElevatedIcacls,
    /// `chmod 0555|0777 <path>`，通常跟在 `sudo -n` 之后
    Chmod,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown fallback flavor '{0}', expected 'chmod', 'icacls' or 'elevated-icacls'")]
pub struct ParseFlavorError(String);

impl ToolFlavor {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            ToolFlavor::ElevatedIcacls
        } else {
            ToolFlavor::Chmod
        }
    }
}

impl FromStr for ToolFlavor {
    type Err = ParseFlavorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chmod" => Ok(ToolFlavor::Chmod),
            "icacls" => Ok(ToolFlavor::Icacls),
            "elevated-icacls" => Ok(ToolFlavor::ElevatedIcacls),
            other => Err(ParseFlavorError(other.to_string())),
        }
    }
}

/// 在限定时间内运行外部程序
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: String,
    prefix_args: Vec<String>,
    flavor: ToolFlavor,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(program: impl Into<String>, flavor: ToolFlavor) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            flavor,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 各参数约定的默认程序：`powershell`、`icacls` 或 `sudo -n`
    pub fn for_flavor(flavor: ToolFlavor) -> Self {
        match flavor {
            ToolFlavor::ElevatedIcacls => Self::new("powershell", flavor),
            ToolFlavor::Icacls => Self::new("icacls", flavor),
            ToolFlavor::Chmod => Self::new("sudo", flavor).with_prefix_args(vec!["-n".to_string()]),
        }
    }

    /// Windows 上经提权的 icacls，其他平台上 `sudo -n chmod`
    pub fn platform_default() -> Self {
        Self::for_flavor(ToolFlavor::platform_default())
    }

    /// 根据配置构建
    ///
    /// `flavor` 决定参数约定，缺省为平台默认；`program` 覆盖该约定的默认程序，
    /// 此时 `args` 替换默认前缀参数。
    pub fn from_config(config: &FallbackConfig) -> Result<Self, ParseFlavorError> {
        let flavor = match &config.flavor {
            Some(name) => name.parse()?,
            None => ToolFlavor::platform_default(),
        };
        let mut tool = Self::for_flavor(flavor);
        if let Some(program) = &config.program {
            tool.program = program.clone();
            tool.prefix_args = config.args.clone();
        } else if !config.args.is_empty() {
            tool.prefix_args = config.args.clone();
        }
        Ok(tool.with_timeout(Duration::from_secs(config.timeout_secs)))
    }

    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn flavor(&self) -> ToolFlavor {
        self.flavor
    }

    /// 程序名之后的完整参数列表
    pub fn arguments(&self, path: &Path, target: AccessPolicy) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.prefix_args.iter().map(OsString::from).collect();
        match self.flavor {
            ToolFlavor::Icacls => {
                args.push(path.as_os_str().to_owned());
                args.push("/inheritance:r".into());
                args.push("/grant:r".into());
                args.push(everyone_grant(target).into());
            }
            ToolFlavor::ElevatedIcacls => {
                args.push("-NoProfile".into());
                args.push("-NonInteractive".into());
                args.push("-Command".into());
                args.push(elevation_script(path, target).into());
            }
            ToolFlavor::Chmod => {
                let mode = match target {
                    AccessPolicy::ReadOnly => "0555",
                    AccessPolicy::Writable => "0777",
                };
                args.push("chmod".into());
                args.push(mode.into());
                args.push(path.as_os_str().to_owned());
            }
        }
        args
    }
}

fn everyone_grant(target: AccessPolicy) -> String {
    let level = match target {
        AccessPolicy::ReadOnly => "RX",
        AccessPolicy::Writable => "F",
    };
    format!("*{}:({})", SID_EVERYONE, level)
}

/// PowerShell 脚本：提权运行 icacls 并以其退出码退出
///
/// 取消 UAC 提示时 `-ErrorAction Stop` 使脚本以非零码退出。
fn elevation_script(path: &Path, target: AccessPolicy) -> String {
    let icacls_args = format!(
        "\"{}\" /inheritance:r /grant:r {}",
        path.to_string_lossy(),
        everyone_grant(target)
    );
    format!(
        "$p = Start-Process -FilePath 'icacls.exe' -ArgumentList '{}' -Verb RunAs -Wait -PassThru -WindowStyle Hidden -ErrorAction Stop; exit $p.ExitCode",
        icacls_args.replace('\'', "''")
    )
}

#[async_trait]
impl PrivilegedTool for CommandTool {
    fn describe(&self, path: &Path, target: AccessPolicy) -> String {
        let args: Vec<String> = self
            .arguments(path, target)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        format!("{} {}", self.program, args.join(" "))
    }

    async fn run(&self, path: &Path, target: AccessPolicy) -> AclResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.arguments(path, target));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true); // a timed-out child is killed when the future is dropped

        let status = match tokio::time::timeout(self.timeout, cmd.status()).await {
            Err(_) => {
                return Err(AclError::AccessDenied(format!(
                    "{} did not finish within {:?}",
                    self.program, self.timeout
                )))
            }
            Ok(Err(e)) => {
                return Err(AclError::AccessDenied(format!(
                    "failed to run {}: {}",
                    self.program, e
                )))
            }
            Ok(Ok(status)) => status,
        };

        if status.success() {
            Ok(())
        } else {
            Err(AclError::AccessDenied(format!(
                "{} exited with {}",
                self.program, status
            )))
        }
    }
}
