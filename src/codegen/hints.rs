//! Prefetch and preload hint sections

use super::{js_value, Context};

const HINT: &str = r#"  // Hints only touch chunks nobody asked for yet
  var hint = (chunkId, rel) => {
    if (__chunkwise_require__.o(installedChunks, chunkId) && installedChunks[chunkId] !== undefined) return;
    installedChunks[chunkId] = null;
    var link = document.createElement("link");
    if (__chunkwise_require__.nc) link.setAttribute("nonce", __chunkwise_require__.nc);
    if (resourceOptions.crossOrigin) link.crossOrigin = resourceOptions.crossOrigin;
    link.rel = rel;
    if (rel === "preload") link.as = "script";
    link.href = __chunkwise_require__.p + __chunkwise_require__.u(chunkId);
    document.head.appendChild(link);
  };
"#;

const PREFETCH: &str = r#"  __chunkwise_require__.F = { j: (chunkId) => hint(chunkId, "prefetch") };
"#;

const PRELOAD: &str = r#"  __chunkwise_require__.H = { j: (chunkId) => hint(chunkId, "preload") };
  __chunkwise_require__.f.preload = (chunkId) => {
    var children = chunkPreloads[chunkId];
    if (Array.isArray(children)) children.forEach(__chunkwise_require__.H.j);
  };
"#;

pub(super) fn render(ctx: &Context) -> String {
    let mut out = String::from(HINT);

    if ctx.features.prefetch {
        out.push_str(PREFETCH);
    }
    if ctx.features.preload {
        out.push_str(&format!("  var chunkPreloads = {};\n", js_value(&ctx.preloads)));
        out.push_str(PRELOAD);
    }

    out
}
