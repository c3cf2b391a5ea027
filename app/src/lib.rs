pub mod fallback;
pub mod inspect;
pub mod mutate;
pub mod policy;
pub mod service;

/// 公共API的prelude模块
/// 用户可以通过 `use app::prelude::*` 来导入最常用的类型
pub mod prelude {
    pub use crate::fallback::{CommandTool, PrivilegedTool, ToolFlavor};
    pub use crate::inspect::{effective_writable, AclListing, Inspection, Inspector};
    pub use crate::mutate::{ApplyOutcome, Mutator};
    pub use crate::policy::AccessPolicy;
    pub use crate::service::{PermissionService, PolicyChange};
}
