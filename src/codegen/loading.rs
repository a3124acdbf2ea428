//! On-demand loading sections

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::{js_value, Context, GenerateError};
use crate::utils::Template;

/// Attributes shared by injected scripts and hint links
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceOptions<'a> {
    /// Milliseconds; the script element gets it in seconds
    timeout: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    cross_origin: Option<&'a str>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    resource_type: Option<&'a str>,
}

pub(super) fn resource_options(ctx: &Context) -> String {
    let loading = &ctx.config.loading;
    let options = ResourceOptions {
        timeout: loading.timeout_ms,
        cross_origin: loading.cross_origin.as_deref(),
        resource_type: loading.resource_type.as_deref(),
    };

    let mut out = format!(
        "  __chunkwise_require__.p = {};\n",
        js_value(&ctx.config.output.public_path)
    );
    if let Some(nonce) = &loading.nonce {
        out.push_str(&format!("  __chunkwise_require__.nc = {};\n", js_value(nonce)));
    }
    out.push_str(&format!("  var resourceOptions = {};\n", js_value(&options)));
    out
}

pub(super) fn installed_chunks(ctx: &Context) -> String {
    format!(
        "  // undefined = not requested, null = hinted, [resolve, reject, promise] = loading, 0 = loaded\n  var installedChunks = {{\n    {}: 0\n  }};\n",
        ctx.chunk.to_js()
    )
}

/// Filenames of the chunks this chunk may load
pub(super) fn filename_map(ctx: &Context) -> Result<String, GenerateError> {
    let template = Template::parse(&ctx.config.output.chunk_filename)?;
    let reachable: HashSet<_> = ctx.graph.async_chunks(ctx.chunk).into_iter().collect();

    let filenames: BTreeMap<String, String> = ctx
        .graph
        .filenames(&template)?
        .into_iter()
        .filter(|(id, _)| reachable.contains(id))
        .map(|(id, filename)| (id.to_string(), filename))
        .collect();

    Ok(format!(
        "  var chunkFilenames = {};\n  __chunkwise_require__.u = (chunkId) => chunkFilenames[chunkId] || chunkId + \".js\";\n",
        js_value(&filenames)
    ))
}

pub(super) const ENSURE_CHUNK: &str = r#"  // ensureChunk: every handler contributes, all of them must settle
  __chunkwise_require__.f = {};
  __chunkwise_require__.e = (chunkId) =>
    Promise.all(
      Object.keys(__chunkwise_require__.f).reduce((promises, key) => {
        __chunkwise_require__.f[key](chunkId, promises);
        return promises;
      }, [])
    );

  // Sink for load failures no caller handled
  __chunkwise_require__.oe = (err) => {
    setTimeout(() => {
      throw err;
    }, 0);
    throw err;
  };

  __chunkwise_require__.i = (chunkIds, moduleId) =>
    Promise.all(chunkIds.map(__chunkwise_require__.e))
      .then(() => __chunkwise_require__(moduleId))
      .catch((err) => __chunkwise_require__.oe(err));
"#;

pub(super) const SCRIPT_LOADER: &str = r#"  var inProgress = {};
  __chunkwise_require__.l = (url, done, key) => {
    if (inProgress[url]) {
      inProgress[url].push(done);
      return;
    }
    var script = document.createElement("script");
    script.charset = "utf-8";
    script.timeout = resourceOptions.timeout / 1000;
    if (__chunkwise_require__.nc) script.setAttribute("nonce", __chunkwise_require__.nc);
    if (resourceOptions.crossOrigin) script.crossOrigin = resourceOptions.crossOrigin;
    if (resourceOptions.type) script.type = resourceOptions.type;
    script.setAttribute("data-chunkwise", key);
    script.src = url;
    inProgress[url] = [done];
    var onScriptComplete = (prev, event) => {
      script.onerror = script.onload = null;
      clearTimeout(timeout);
      var doneFns = inProgress[url];
      delete inProgress[url];
      if (script.parentNode) script.parentNode.removeChild(script);
      if (doneFns) doneFns.forEach((fn) => fn(event));
      if (prev) return prev(event);
    };
    var timeout = setTimeout(
      onScriptComplete.bind(null, undefined, { type: "timeout", target: script }),
      resourceOptions.timeout
    );
    script.onerror = onScriptComplete.bind(null, script.onerror);
    script.onload = onScriptComplete.bind(null, script.onload);
    document.head.appendChild(script);
  };
"#;

pub(super) const SCRIPT_HANDLER: &str = r#"  __chunkwise_require__.f.j = (chunkId, promises) => {
    var loading = __chunkwise_require__.o(installedChunks, chunkId) ? installedChunks[chunkId] : undefined;
    if (loading === 0) return;
    if (loading) {
      promises.push(loading[2]);
      return;
    }
    var promise = new Promise((resolve, reject) => (loading = installedChunks[chunkId] = [resolve, reject]));
    promises.push((loading[2] = promise));
    var url = __chunkwise_require__.p + __chunkwise_require__.u(chunkId);
    // Only the attempt still in flight may be rejected
    var loadingEnded = (event) => {
      if (installedChunks[chunkId] !== loading) return;
      delete installedChunks[chunkId];
      var errorType = event && (event.type === "load" ? "missing" : event.type);
      var realSrc = (event && event.target && event.target.src) || url;
      var error = new Error();
      if (errorType === "timeout") {
        error.name = "ChunkLoadTimeout";
        error.message = "Loading chunk " + chunkId + " timed out.\n(" + realSrc + ")";
      } else {
        error.name = "ChunkLoadError";
        error.message = "Loading chunk " + chunkId + " failed.\n(" + errorType + ": " + realSrc + ")";
      }
      error.type = errorType;
      error.request = realSrc;
      loading[1](error);
    };
    __chunkwise_require__.l(url, loadingEnded, "chunk-" + chunkId);
  };
"#;

pub(super) const NOOP_HANDLER: &str = r#"  // This chunk loads nothing itself; other chunks still call ensureChunk
  __chunkwise_require__.f.j = (chunkId, promises) => {};
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Features;
    use crate::config::Config;
    use crate::graph::{fixtures, ChunkGraph, ChunkId};
    use pretty_assertions::assert_eq;

    fn with_context<T>(config: &Config, graph: &ChunkGraph, chunk: &str, f: impl FnOnce(&Context) -> T) -> T {
        let chunk: ChunkId = chunk.parse().unwrap();
        let ctx = Context {
            config,
            graph,
            chunk: &chunk,
            features: Features::default(),
            preloads: BTreeMap::new(),
        };
        f(&ctx)
    }

    #[test]
    fn test_resource_options_carry_configured_attributes() {
        let mut config = Config::default_config();
        config.output.public_path = "https://cdn.example.com/".to_string();
        config.loading.timeout_ms = 500;
        config.loading.cross_origin = Some("anonymous".to_string());
        config.loading.resource_type = Some("module".to_string());
        config.loading.nonce = Some("abc".to_string());

        let out = with_context(&config, &fixtures::lazy_split(), "main", resource_options);

        assert_eq!(
            out,
            "  __chunkwise_require__.p = \"https://cdn.example.com/\";\n  __chunkwise_require__.nc = \"abc\";\n  var resourceOptions = {\"crossOrigin\":\"anonymous\",\"timeout\":500,\"type\":\"module\"};\n"
        );
    }

    #[test]
    fn test_numeric_chunk_ids() {
        let graph = ChunkGraph::from_json(
            r#"{
                "chunks": [{ "id": 0 }, { "id": 7, "hash": "77777777" }],
                "groups": [
                    { "id": "main", "kind": "entry", "chunks": [0], "children": ["lazy"] },
                    { "id": "lazy", "kind": "async", "chunks": [7] }
                ]
            }"#,
        )
        .unwrap();
        let mut config = Config::default_config();
        config.output.chunk_filename = "[id].[contenthash:4].js".to_string();

        let table = with_context(&config, &graph, "0", installed_chunks);
        assert!(table.contains("\n    0: 0\n"));

        let map = with_context(&config, &graph, "0", |ctx| filename_map(ctx).unwrap());
        assert!(map.starts_with("  var chunkFilenames = {\"7\":\"7.7777.js\"};"));
    }

    #[test]
    fn test_bad_filename_template() {
        let mut config = Config::default_config();
        config.output.chunk_filename = "[runtime].js".to_string();

        let err = with_context(&config, &fixtures::lazy_split(), "main", |ctx| {
            filename_map(ctx).unwrap_err()
        });
        assert!(matches!(err, GenerateError::Template(_)));
    }
}
