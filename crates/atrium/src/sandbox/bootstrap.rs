//! Synthesized sandbox bootstrap artifacts.
//!
//! Every mount carries the project snapshot plus two sandbox-only files: a
//! static-file server entry point and a manifest declaring its start
//! command. These are runtime artifacts; they are never persisted back into
//! the file tree store.

use atrium_protocol::FileTree;

/// Path of the synthesized server entry point inside the sandbox.
pub const SERVER_ENTRY_PATH: &str = "server.js";

/// Path of the synthesized manifest inside the sandbox.
pub const MANIFEST_PATH: &str = "package.json";

/// The bootstrap server: serves the mounted tree statically and falls back
/// to `index.html`, announcing the bound port on stdout.
fn server_entry(port: u16) -> String {
    format!(
        r#"const express = require('express');
const app = express();
const path = require('path');

app.use(express.static('.'));

app.get('*', (req, res) => {{
    res.sendFile(path.join(__dirname, 'index.html'));
}});

app.listen({port}, () => {{
    console.log('Server running on port {port}');
}});
"#
    )
}

/// The manifest declaring the start command and the server's one dependency.
fn manifest() -> String {
    r#"{
  "name": "web-project",
  "version": "1.0.0",
  "scripts": {
    "start": "node server.js"
  },
  "dependencies": {
    "express": "^4.17.1"
  }
}
"#
    .to_string()
}

/// The full mount payload: the store snapshot plus the bootstrap files.
///
/// Bootstrap files win over store files of the same name inside the sandbox;
/// the store itself is never touched.
pub fn mount_snapshot(tree: &FileTree, port: u16) -> FileTree {
    let mut snapshot = tree.clone();
    snapshot.insert(SERVER_ENTRY_PATH, server_entry(port));
    snapshot.insert(MANIFEST_PATH, manifest());
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_carries_tree_and_bootstrap() {
        let tree: FileTree = [("index.html".to_string(), "<h1>hi</h1>".to_string())]
            .into_iter()
            .collect();
        let snapshot = mount_snapshot(&tree, 3000);

        assert_eq!(snapshot.get("index.html"), Some("<h1>hi</h1>"));
        assert!(snapshot.contains(SERVER_ENTRY_PATH));
        assert!(snapshot.contains(MANIFEST_PATH));

        // The source tree is untouched.
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_server_entry_announces_configured_port() {
        let entry = server_entry(8080);
        assert!(entry.contains("app.listen(8080"));
        assert!(entry.contains("Server running on port 8080"));
    }

    #[test]
    fn test_manifest_is_valid_json_with_start_script() {
        let parsed: serde_json::Value = serde_json::from_str(&manifest()).unwrap();
        assert_eq!(parsed["scripts"]["start"], "node server.js");
    }
}
