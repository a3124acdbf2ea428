//! Hot update bootstrap section
//!
//! Installs the `hmrD` delivery hook the merger consults, address functions
//! for the update manifest and update chunks, and the host-visible global that
//! update chunks call. Applying an update is left to the hot-swap mechanism;
//! the bootstrap only collects the replacement factories per build hash.

use super::{js_value, Context, GenerateError};
use crate::utils::{Placeholder, Template};

const HOT: &str = r#"  // Chunks delivered to this runtime; only these take part in an update
  __chunkwise_require__.hmrD = ((previous) => (data) => {
    data[0].forEach((chunkId) => {
      hotLoadedChunks[chunkId] = true;
    });
    if (previous) previous(data);
  })(__chunkwise_require__.hmrD);

  __chunkwise_require__.hmrM = () => {
    if (typeof fetch === "undefined") throw new Error("No browser support: need fetch API");
    return fetch(__chunkwise_require__.p + __chunkwise_require__.hmrF()).then((response) => {
      if (response.status === 404) return;
      if (!response.ok) throw new Error("Failed to fetch update manifest " + response.statusText);
      return response.json();
    });
  };

  // Updates in progress, keyed by the build hash they apply to
  var hotUpdates = {};
  __chunkwise_require__.hmrC = (manifest) => {
    var hash = __chunkwise_require__.h();
    var update = (hotUpdates[hash] = { hash: hash, manifest: manifest, modules: {}, awaiting: {} });
    var promises = (manifest.c || [])
      .filter((chunkId) => hotLoadedChunks[chunkId])
      .map(
        (chunkId) =>
          new Promise((resolve, reject) => {
            update.awaiting[chunkId] = resolve;
            __chunkwise_require__.l(
              __chunkwise_require__.p + __chunkwise_require__.hu(chunkId),
              (event) => {
                if (!update.awaiting[chunkId]) return;
                delete update.awaiting[chunkId];
                var error = new Error("Loading hot update chunk " + chunkId + " failed.\n(" + (event && event.type) + ")");
                error.type = event && event.type;
                reject(error);
              },
              "hot-update-" + chunkId
            );
          })
      );
    return Promise.all(promises).then(() => update);
  };

  // Move to the next build once an update has been applied
  __chunkwise_require__.hmrS = (nextHash) => {
    var update = hotUpdates[currentHash];
    if (update) (update.manifest.r || []).forEach((chunkId) => delete hotLoadedChunks[chunkId]);
    delete hotUpdates[currentHash];
    currentHash = nextHash;
  };

  var hotUpdateCallback = (chunkId, moreModules) => {
    var update = hotUpdates[currentHash];
    if (update) {
      for (var moduleId in moreModules) {
        if (__chunkwise_require__.o(moreModules, moduleId)) update.modules[moduleId] = moreModules[moduleId];
      }
      var resolve = update.awaiting[chunkId];
      if (resolve) {
        delete update.awaiting[chunkId];
        resolve();
      }
    }
    if (parentHotUpdateCallback) parentHotUpdateCallback(chunkId, moreModules);
  };
"#;

pub(super) fn render(ctx: &Context) -> Result<String, GenerateError> {
    let hot = &ctx.config.hot;
    let runtime_name = js_value(&hot.runtime);

    let chunk_address = Template::parse(&hot.chunk_address_template)?.to_js_expr(|p| match p {
        Placeholder::Id => Some("chunkId".to_string()),
        Placeholder::FullHash => Some("__chunkwise_require__.h()".to_string()),
        Placeholder::Runtime => Some(runtime_name.clone()),
        _ => None,
    })?;
    let manifest_address = Template::parse(&hot.entry_address_template)?.to_js_expr(|p| match p {
        Placeholder::FullHash => Some("__chunkwise_require__.h()".to_string()),
        Placeholder::Runtime => Some(runtime_name.clone()),
        _ => None,
    })?;

    let mut out = String::new();
    out.push_str(&format!("  var currentHash = {};\n", js_value(&ctx.graph.full_hash())));
    out.push_str("  __chunkwise_require__.h = () => currentHash;\n");
    out.push_str(&format!("  __chunkwise_require__.hu = (chunkId) => {};\n", chunk_address));
    out.push_str(&format!("  __chunkwise_require__.hmrF = () => {};\n", manifest_address));
    out.push_str(&format!(
        "  var hotLoadedChunks = {{ {}: true }};\n\n",
        ctx.chunk.to_js()
    ));
    out.push_str(HOT);

    let global = format!("{}[{}]", ctx.config.output.global_namespace, js_value(&hot.global));
    out.push_str(&format!("  var parentHotUpdateCallback = {};\n", global));
    out.push_str(&format!("  {} = hotUpdateCallback;\n", global));

    Ok(out)
}
