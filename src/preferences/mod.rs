// ============================================================================
// Preferences Module
// ============================================================================
//
// Resolves, for a channel, the ordered delivery endpoints to try:
// - store/    - durable source of truth (Postgres)
// - cache/    - bounded TTL cache in front of the store
// - resolver/ - cache-aside orchestration, the only caller of the store
//
// ============================================================================

mod cache;
mod resolver;
mod store;

pub use cache::PreferenceCache;
pub use resolver::{PreferenceResolver, ResolveError};
pub use store::{PgPreferenceStore, PreferenceStore, StoreError};
