//! Delivery merger, install step, deferred entry scheduler and startup

use super::{js_value, Context};
use crate::graph::ChildOrder;
use crate::runtime::DeferredEntry;

pub(super) const SCHEDULER: &str = r#"  // Entries waiting until every chunk of their group is loaded
  var deferred = [];
  __chunkwise_require__.O = (entries) => {
    if (entries) deferred.push(...entries);
    var ready = [];
    deferred = deferred.filter((entry) => {
      if (entry[1].every((chunkId) => installedChunks[chunkId] === 0)) {
        ready.push(entry);
        return false;
      }
      return true;
    });
    ready.forEach((entry) => __chunkwise_require__(entry[0]));
    return ready.length;
  };
"#;

const DELIVER_HEAD: &str = r#"  // Merge one delivery: [chunkIds, modules, entries?, prefetch?]
  // parentPush is the consumer installed before this runtime (or the plain array push)
  var deliverChunk = (parentPush, data) => {
    var chunkIds = data[0];
    var moreModules = data[1];
    var resolves = [];
    for (var i = 0; i < chunkIds.length; i++) {
      var chunkId = chunkIds[i];
      if (__chunkwise_require__.o(installedChunks, chunkId) && installedChunks[chunkId]) {
        resolves.push(installedChunks[chunkId][0]);
      }
      installedChunks[chunkId] = 0;
    }
    for (var moduleId in moreModules) {
      if (__chunkwise_require__.o(moreModules, moduleId) && !__chunkwise_require__.o(__chunkwise_require__.m, moduleId)) {
        __chunkwise_require__.m[moduleId] = moreModules[moduleId];
      }
    }
    if (__chunkwise_require__.hmrD) __chunkwise_require__.hmrD(data);
"#;

const DELIVER_PREFETCH: &str = r#"    if (data[3]) data[3].forEach(__chunkwise_require__.F.j);
"#;

const DELIVER_RESOLVE: &str = r#"    while (resolves.length) resolves.shift()();
    if (parentPush) parentPush(data);
"#;

const DELIVER_ENTRIES: &str = r#"    return __chunkwise_require__.O(data[2]);
"#;

const INSTALL: &str = r#"  deliveryArray.forEach(deliverChunk.bind(null, 0));
  deliveryArray.push = deliverChunk.bind(null, deliveryArray.push.bind(deliveryArray));
"#;

/// The merger and the install step
pub(super) fn render(ctx: &Context) -> String {
    let features = ctx.features;
    let mut out = String::from(DELIVER_HEAD);

    if features.prefetch {
        out.push_str(DELIVER_PREFETCH);
    }
    out.push_str(DELIVER_RESOLVE);
    if features.deferral {
        out.push_str(DELIVER_ENTRIES);
    }
    out.push_str("  };\n\n");

    let output = &ctx.config.output;
    let key = js_value(&output.delivery_array);
    out.push_str(&format!(
        "  var deliveryArray = ({ns}[{key}] = {ns}[{key}] || []);\n",
        ns = output.global_namespace,
        key = key
    ));
    out.push_str(INSTALL);

    out
}

/// Startup: entry modules and prefetches of the chunk itself
pub(super) fn startup(ctx: &Context) -> String {
    let entries = DeferredEntry::for_chunk(ctx.graph, ctx.chunk);
    let mut out = String::new();

    if ctx.features.deferral {
        if !entries.is_empty() {
            let tuples: Vec<_> = entries.iter().map(|e| (&e.entry, &e.chunks)).collect();
            out.push_str(&format!("  __chunkwise_require__.O({});\n", js_value(&tuples)));
        }
    } else {
        for entry in &entries {
            out.push_str(&format!("  __chunkwise_require__({});\n", entry.entry.to_js()));
        }
    }

    if ctx.features.prefetch {
        let prefetch = ctx.graph.child_chunks_by_order(ctx.chunk, ChildOrder::Prefetch);
        out.push_str(&format!(
            "  {}.forEach(__chunkwise_require__.F.j);\n",
            js_value(&prefetch)
        ));
    }

    out
}
