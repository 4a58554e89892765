use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared client handles keyed by connection id.
///
/// Owned by a workflow and handed to nodes through their context. Nodes keep
/// only the connection id, so one client is shared by every node that names it.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
  connections: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ConnectionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a client under `id`, replacing any previous one.
  pub fn register<T: Any + Send + Sync>(&mut self, id: impl Into<String>, client: T) {
    self.connections.insert(id.into(), Arc::new(client));
  }

  /// Builder form of [`register`](Self::register).
  pub fn with<T: Any + Send + Sync>(mut self, id: impl Into<String>, client: T) -> Self {
    self.register(id, client);
    self
  }

  /// Look up a client by id. Returns `None` if missing or of another type.
  pub fn get<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
    self.connections.get(id).cloned()?.downcast::<T>().ok()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.connections.contains_key(id)
  }

  pub fn remove(&mut self, id: &str) -> bool {
    self.connections.remove(id).is_some()
  }

  /// Registered ids, sorted.
  pub fn ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.connections.keys().map(|k| k.as_str()).collect();
    ids.sort_unstable();
    ids
  }
}

impl std::fmt::Debug for ConnectionRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionRegistry")
      .field("ids", &self.ids())
      .finish()
  }
}
