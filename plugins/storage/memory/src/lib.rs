use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use bridge_api::{ConfigError, RemoteStore, StoreError, StoreFactory, parse_config};

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_children() -> usize {
    100_000
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryStoreConfig {
    /// Максимум children под одним путём; старейшие вытесняются.
    #[serde(default = "default_max_children")]
    pub max_children: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_children: default_max_children(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-memory иерархический store. Для локального запуска без сети
/// и для тестов pipeline'а.
///
/// Ключи генерируются из монотонного счётчика и дополнены нулями,
/// поэтому лексикографический порядок ключей совпадает с порядком append'ов.
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, VecDeque<(String, serde_json::Value)>>>,
    next_key: AtomicU64,
    max_children: usize,
}

impl MemoryStore {
    pub fn new(max_children: usize) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            next_key: AtomicU64::new(1),
            max_children: max_children.max(1),
        }
    }

    /// Children под `path` в порядке ключей.
    pub async fn children(&self, path: &str) -> Vec<(String, serde_json::Value)> {
        let nodes = self.nodes.read().await;
        nodes
            .get(&canonical(path))
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Всего children во всех путях.
    pub async fn len(&self) -> usize {
        self.nodes.read().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Пути, под которыми есть хотя бы один child.
    pub async fn paths(&self) -> Vec<String> {
        self.nodes.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_max_children())
    }
}

/// "/a//b/" → "/a/b". Корень: "/".
fn canonical(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

impl RemoteStore for MemoryStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn append_child(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
        let path = canonical(path);
        let value = value.clone();
        Box::pin(async move {
            if path == "/" {
                return Err(StoreError::fatal("append to the root path is not allowed"));
            }
            let key = format!("{:020}", self.next_key.fetch_add(1, Ordering::Relaxed));
            let mut nodes = self.nodes.write().await;
            let children = nodes.entry(path).or_default();
            if children.len() >= self.max_children {
                children.pop_front();
            }
            children.push_back((key.clone(), value));
            Ok(key)
        })
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let nodes = self.nodes.read().await;
            let children: usize = nodes.values().map(VecDeque::len).sum();
            tracing::info!(paths = nodes.len(), children, "memory store closed");
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryStoreFactory;

impl StoreFactory for MemoryStoreFactory {
    fn create(&self, config_json: &str) -> Result<Arc<dyn RemoteStore>, ConfigError> {
        let config: MemoryStoreConfig = parse_config(config_json)?;
        tracing::info!(max_children = config.max_children, "memory store created");
        Ok(Arc::new(MemoryStore::new(config.max_children)))
    }
}
