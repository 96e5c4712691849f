// =============================================================================
// In-binary strategy plugins
// =============================================================================
//
// Plugins are compiled into this binary and registered by name with the
// `PluginRegistry` in `main.rs` — there is no `dlopen`-style loading here.
// Each plugin still ships a manifest under `strategies/<name>/config.json`
// so `strategy::manifest::discover_plugins` can validate it shares shape
// with what `main.rs` registers, and so parameter validation at `load` time
// has a schema to check against.

pub mod macd_cross;
