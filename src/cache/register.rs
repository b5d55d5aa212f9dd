use anyhow::Result;

use crate::cfg::register_trait;

use super::{ConfigCache, MemoryCache, MemoryCacheConfig};

crate::impl_from!(MemoryCacheConfig => MemoryCache);
crate::impl_box_from!(MemoryCache => dyn ConfigCache);

/// 注册所有 ConfigCache 实现到 cfg 注册表
///
/// # 注册的类型
/// - `MemoryCache` - 基于 DashMap 的内存缓存
///
/// # 示例
/// ```ignore
/// use cfgx::cache::{register_caches, ConfigCache};
/// use cfgx::cfg::{create_trait_from_type_options, TypeOptions};
///
/// register_caches()?;
///
/// let opts = TypeOptions::from_json(r#"{
///     "type": "MemoryCache",
///     "options": { "ttl": "10m" }
/// }"#)?;
///
/// let cache: Box<dyn ConfigCache> = create_trait_from_type_options(&opts)?;
/// ```
pub fn register_caches() -> Result<()> {
    register_trait::<MemoryCache, dyn ConfigCache, MemoryCacheConfig>("MemoryCache")?;
    Ok(())
}
