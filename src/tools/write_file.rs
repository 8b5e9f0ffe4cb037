//! File-writing tool.
//!
//! Paths are confined to a workspace root: absolute paths and parent
//! traversal are rejected before any filesystem access.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use model_provider::{CancelSignal, ToolDefinition};
use serde_json::{json, Map, Value};

use super::{string_argument, ToolExecutor, ToolOutcome};

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    /// Writes resolve relative to `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        if raw.trim().is_empty() {
            return Err("path must not be empty".to_string());
        }

        let path = Path::new(raw);
        if path.is_absolute() {
            return Err(format!("absolute paths are not allowed: {raw}"));
        }

        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(format!("path must not escape the workspace: {raw}"));
            }
        }

        Ok(self.root.join(path))
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ToolExecutor for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file at a workspace-relative path.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Workspace-relative file path",
                    },
                    "content": {
                        "type": "string",
                        "description": "Text to write",
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["overwrite", "append"],
                        "description": "Write mode, defaults to overwrite",
                    },
                    "create_dirs": {
                        "type": "boolean",
                        "description": "Create missing parent directories",
                    },
                },
                "required": ["path", "content"],
            }),
        }
    }

    fn execute(&self, arguments: &Map<String, Value>, _cancel: &CancelSignal) -> ToolOutcome {
        let Some(raw_path) = string_argument(arguments, "path") else {
            return ToolOutcome::fail("missing required argument: path");
        };
        let Some(content) = string_argument(arguments, "content") else {
            return ToolOutcome::fail("missing required argument: content");
        };
        let mode = string_argument(arguments, "mode").unwrap_or_else(|| "overwrite".to_string());
        let create_dirs = arguments
            .get("create_dirs")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let path = match self.resolve(&raw_path) {
            Ok(path) => path,
            Err(message) => return ToolOutcome::fail(message),
        };

        if create_dirs {
            if let Some(parent) = path.parent() {
                if let Err(error) = fs::create_dir_all(parent) {
                    return ToolOutcome::fail(format!(
                        "failed to create parent directories for {raw_path}: {error}"
                    ));
                }
            }
        }

        let result = match mode.as_str() {
            "overwrite" => fs::write(&path, content.as_bytes()),
            "append" => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(content.as_bytes())),
            other => return ToolOutcome::fail(format!("unsupported mode: {other}")),
        };

        match result {
            Ok(()) => ToolOutcome::ok(json!({
                "path": raw_path,
                "bytes_written": content.len(),
                "mode": mode,
            })),
            Err(error) => ToolOutcome::fail(format!("failed to write {raw_path}: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::*;

    fn cancel() -> CancelSignal {
        Arc::new(AtomicBool::new(false))
    }

    fn arguments(path: &str, content: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("path".to_string(), json!(path));
        map.insert("content".to_string(), json!(content));
        map
    }

    #[test]
    fn writes_relative_path_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());

        let outcome = tool.execute(&arguments("notes.txt", "hello"), &cancel());
        assert!(outcome.success, "outcome: {outcome:?}");
        assert_eq!(outcome.payload["bytes_written"], 5);
        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt")).expect("file exists"),
            "hello"
        );
    }

    #[test]
    fn append_mode_extends_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());

        tool.execute(&arguments("log.txt", "one\n"), &cancel());
        let mut args = arguments("log.txt", "two\n");
        args.insert("mode".to_string(), json!("append"));
        let outcome = tool.execute(&args, &cancel());

        assert!(outcome.success);
        assert_eq!(
            fs::read_to_string(dir.path().join("log.txt")).expect("file exists"),
            "one\ntwo\n"
        );
    }

    #[test]
    fn absolute_paths_are_rejected_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());
        let target = dir.path().join("escape.txt");

        let outcome = tool.execute(
            &arguments(target.to_str().expect("utf8 path"), "nope"),
            &cancel(),
        );

        assert!(!outcome.success);
        assert!(outcome
            .error
            .as_deref()
            .is_some_and(|message| message.contains("absolute")));
        assert!(!target.exists());
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path().join("inner"));

        let outcome = tool.execute(&arguments("../escape.txt", "nope"), &cancel());

        assert!(!outcome.success);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn missing_parent_directories_require_create_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());

        let outcome = tool.execute(&arguments("deep/nested/file.txt", "x"), &cancel());
        assert!(!outcome.success);

        let mut args = arguments("deep/nested/file.txt", "x");
        args.insert("create_dirs".to_string(), json!(true));
        let outcome = tool.execute(&args, &cancel());
        assert!(outcome.success);
        assert!(dir.path().join("deep/nested/file.txt").exists());
    }

    #[test]
    fn unsupported_mode_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());

        let mut args = arguments("a.txt", "x");
        args.insert("mode".to_string(), json!("truncate-weirdly"));
        let outcome = tool.execute(&args, &cancel());
        assert!(!outcome.success);
    }
}
