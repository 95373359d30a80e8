//! Per-tool renderers.
//!
//! Arguments passed here come from the chat reducer and may be a partial,
//! repaired, or `{"raw": ..}` value while the tool is still streaming, so
//! every lookup is optional and renderers fall back to whatever is present.

use ledgerpilot_chat::{ToolCall, ToolStatus};
use serde_json::Value;

use crate::ToolKind;
use crate::view::{LineStyle, Tone, ToolView};

const PATH_KEYS: &[&str] = &["path", "target_file", "file_path", "filename"];
const DIR_KEYS: &[&str] = &["dir", "path", "relative_workspace_path", "directory"];
const QUERY_KEYS: &[&str] = &["query", "pattern", "regex"];
const CONTENT_KEYS: &[&str] = &["content", "contents", "file_content"];
const OLD_KEYS: &[&str] = &["old_string", "old_str", "search"];
const NEW_KEYS: &[&str] = &["new_string", "new_str", "replace"];
const OUTPUT_KEYS: &[&str] = &["content", "output", "stdout", "text", "message"];

/// First string-valued field among `keys`.
fn str_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
}

fn or_placeholder(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("…")
}

/// Pull the displayable text out of a tool result.
fn result_text(result: &Value) -> String {
    match result {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Object(_) => match str_arg(result, OUTPUT_KEYS) {
            Some(text) => text.to_string(),
            None => pretty(result),
        },
        other => pretty(other),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Items of a listing result: a JSON array of strings or `{name, type}`
/// objects, an object wrapping one under `entries`/`files`/`matches`, or
/// newline-separated text.
fn result_items(result: &Value) -> Vec<String> {
    let array = result.as_array().or_else(|| {
        ["entries", "files", "matches", "results"]
            .iter()
            .find_map(|key| result.get(*key).and_then(Value::as_array))
    });
    match array {
        Some(items) => items.iter().map(item_label).collect(),
        None => result_text(result)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect(),
    }
}

fn item_label(item: &Value) -> String {
    if let Some(text) = item.as_str() {
        return text.to_string();
    }
    let name = str_arg(item, &["name", "path", "file"]);
    let is_dir = item.get("is_dir").and_then(Value::as_bool).unwrap_or(false)
        || matches!(
            item.get("type").and_then(Value::as_str),
            Some("dir" | "directory")
        );
    match (name, item.get("line").and_then(Value::as_u64)) {
        (Some(name), Some(line)) => {
            let text = str_arg(item, &["content", "text"]).unwrap_or_default();
            format!("{name}:{line}: {}", text.trim())
        }
        (Some(name), None) if is_dir => format!("{name}/"),
        (Some(name), None) => name.to_string(),
        (None, _) => item.to_string(),
    }
}

fn title(kind: &ToolKind, args: &Value) -> String {
    match kind {
        ToolKind::ReadFile => format!("Read {}", or_placeholder(str_arg(args, PATH_KEYS))),
        ToolKind::WriteFile => format!("Write {}", or_placeholder(str_arg(args, PATH_KEYS))),
        ToolKind::EditFile => format!("Edit {}", or_placeholder(str_arg(args, PATH_KEYS))),
        ToolKind::DeleteFile => format!("Delete {}", or_placeholder(str_arg(args, PATH_KEYS))),
        ToolKind::ListDir => format!("List {}", str_arg(args, DIR_KEYS).unwrap_or(".")),
        ToolKind::FileSearch => {
            format!("Find files \"{}\"", or_placeholder(str_arg(args, QUERY_KEYS)))
        }
        ToolKind::GrepSearch => {
            let mut title = format!("Search \"{}\"", or_placeholder(str_arg(args, QUERY_KEYS)));
            if let Some(include) = str_arg(args, &["include_pattern", "include", "glob"]) {
                title.push_str(&format!(" in {include}"));
            }
            title
        }
        ToolKind::RunTerminalCmd => {
            format!("Run {}", or_placeholder(str_arg(args, &["command", "cmd"])))
        }
        ToolKind::Other(name) => name.clone(),
    }
}

/// View while arguments are still streaming.
pub fn render_update(kind: &ToolKind, args: &Value) -> ToolView {
    let mut view = ToolView::new(title(kind, args), Tone::Running);
    match kind {
        ToolKind::WriteFile => {
            if let Some(content) = str_arg(args, CONTENT_KEYS) {
                view.push_block(LineStyle::Added, content);
            }
        }
        ToolKind::EditFile => push_edit(&mut view, args),
        ToolKind::Other(_) => push_json(&mut view, args),
        _ => {}
    }
    view
}

/// View once arguments are final and the tool is running.
pub fn render_execute(kind: &ToolKind, args: &Value) -> ToolView {
    let mut view = ToolView::new(title(kind, args), Tone::Running);
    match kind {
        ToolKind::WriteFile => {
            let lines = str_arg(args, CONTENT_KEYS).map_or(0, |c| c.lines().count());
            view.push(LineStyle::Muted, format!("writing {lines} lines"));
        }
        ToolKind::EditFile => push_edit(&mut view, args),
        ToolKind::RunTerminalCmd => {
            if let Some(command) = str_arg(args, &["command", "cmd"]) {
                view.push(LineStyle::Code, format!("$ {command}"));
            }
        }
        ToolKind::ReadFile => {
            let start = args.get("start_line").and_then(Value::as_u64);
            let end = args.get("end_line").and_then(Value::as_u64);
            if let (Some(start), Some(end)) = (start, end) {
                view.push(LineStyle::Muted, format!("lines {start}-{end}"));
            }
        }
        ToolKind::Other(_) => push_json(&mut view, args),
        _ => {}
    }
    view
}

/// View of a finished tool.  A present `error` always wins over `result`.
pub fn render_result(
    kind: &ToolKind,
    args: &Value,
    result: Option<&Value>,
    error: Option<&str>,
    max_lines: usize,
) -> ToolView {
    if let Some(error) = error {
        let mut view = ToolView::new(title(kind, args), Tone::Error);
        view.push_block(LineStyle::Error, error);
        view.truncate(max_lines);
        return view;
    }

    let result = result.unwrap_or(&Value::Null);
    let mut view = ToolView::new(title(kind, args), Tone::Success);
    match kind {
        ToolKind::ReadFile => view.push_block(LineStyle::Code, &result_text(result)),
        ToolKind::WriteFile => {
            let lines = str_arg(args, CONTENT_KEYS).map_or(0, |c| c.lines().count());
            view.push(LineStyle::Muted, format!("wrote {lines} lines"));
        }
        ToolKind::EditFile => {
            push_edit(&mut view, args);
            let summary = result_text(result);
            if !summary.trim().is_empty() {
                view.push_block(LineStyle::Muted, &summary);
            }
        }
        ToolKind::DeleteFile => view.push(LineStyle::Muted, "deleted"),
        ToolKind::ListDir | ToolKind::FileSearch | ToolKind::GrepSearch => {
            let items = result_items(result);
            if items.is_empty() {
                view.push(LineStyle::Muted, "no results");
            }
            for item in items {
                view.push(LineStyle::Plain, item);
            }
        }
        ToolKind::RunTerminalCmd => push_command_output(&mut view, result),
        ToolKind::Other(_) => push_json(&mut view, result),
    }
    view.truncate(max_lines);
    view
}

/// Pick the renderer for a call's current status.
pub fn render_call(call: &ToolCall, max_lines: usize) -> ToolView {
    let kind = ToolKind::from_name(&call.name);
    let mut view = match call.status {
        ToolStatus::Started | ToolStatus::Streaming => render_update(&kind, &call.parsed),
        ToolStatus::Executing => render_execute(&kind, &call.parsed),
        ToolStatus::Completed | ToolStatus::Failed => render_result(
            &kind,
            &call.parsed,
            call.result.as_ref(),
            call.error.as_deref(),
            max_lines,
        ),
    };
    view.truncate(max_lines);
    view
}

fn push_edit(view: &mut ToolView, args: &Value) {
    if let Some(old) = str_arg(args, OLD_KEYS) {
        view.push_block(LineStyle::Removed, old);
    }
    if let Some(new) = str_arg(args, NEW_KEYS) {
        view.push_block(LineStyle::Added, new);
    }
    if let Some(code) = str_arg(args, &["code_edit"]) {
        view.push_block(LineStyle::Code, code);
    }
}

fn push_command_output(view: &mut ToolView, result: &Value) {
    let exit_code = result.get("exit_code").and_then(Value::as_i64);
    let stderr = result.get("stderr").and_then(Value::as_str);
    view.push_block(LineStyle::Code, &result_text(result));
    if let Some(stderr) = stderr.filter(|s| !s.trim().is_empty()) {
        view.push_block(LineStyle::Error, stderr);
    }
    if let Some(code) = exit_code.filter(|code| *code != 0) {
        view.tone = Tone::Error;
        view.push(LineStyle::Error, format!("exit code {code}"));
    }
}

fn push_json(view: &mut ToolView, value: &Value) {
    match value {
        Value::Null => {}
        Value::Object(map) if map.is_empty() => {}
        Value::String(text) => view.push_block(LineStyle::Code, text),
        other => view.push_block(LineStyle::Code, &pretty(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ViewLine;
    use serde_json::json;

    fn texts(view: &ToolView) -> Vec<&str> {
        view.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn write_file_update_previews_partial_content() {
        let view = render_update(
            &ToolKind::WriteFile,
            &json!({"path": "asset.go", "content": "package main\nfunc"}),
        );
        assert_eq!(view.title, "Write asset.go");
        assert_eq!(view.tone, Tone::Running);
        assert_eq!(
            view.lines,
            vec![
                ViewLine::new(LineStyle::Added, "package main"),
                ViewLine::new(LineStyle::Added, "func"),
            ]
        );
    }

    #[test]
    fn update_tolerates_missing_and_raw_arguments() {
        let view = render_update(&ToolKind::ReadFile, &json!({"raw": "{\"pa"}));
        assert_eq!(view.title, "Read …");
        let view = render_update(&ToolKind::WriteFile, &json!({"path": null}));
        assert_eq!(view.title, "Write …");
        assert!(view.lines.is_empty());
    }

    #[test]
    fn path_aliases_are_accepted() {
        let view = render_execute(&ToolKind::DeleteFile, &json!({"target_file": "old.go"}));
        assert_eq!(view.title, "Delete old.go");
    }

    #[test]
    fn edit_file_renders_removed_then_added() {
        let args = json!({"path": "a.go", "old_string": "x := 1", "new_string": "x := 2\ny := 3"});
        let view = render_result(&ToolKind::EditFile, &args, Some(&json!("ok")), None, 20);
        assert_eq!(view.tone, Tone::Success);
        let styles: Vec<_> = view.lines.iter().map(|l| l.style).collect();
        assert_eq!(
            styles,
            vec![
                LineStyle::Removed,
                LineStyle::Added,
                LineStyle::Added,
                LineStyle::Muted
            ]
        );
    }

    #[test]
    fn error_wins_over_result() {
        let view = render_result(
            &ToolKind::WriteFile,
            &json!({"path": "a.go"}),
            Some(&json!({"ok": true})),
            Some("disk full"),
            20,
        );
        assert_eq!(view.tone, Tone::Error);
        assert_eq!(view.lines, vec![ViewLine::new(LineStyle::Error, "disk full")]);
    }

    #[test]
    fn read_file_result_is_truncated() {
        let body: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        let view = render_result(
            &ToolKind::ReadFile,
            &json!({"path": "big.go"}),
            Some(&json!({"content": body})),
            None,
            5,
        );
        assert_eq!(view.lines.len(), 6);
        assert_eq!(view.lines[0].text, "line 1");
        assert_eq!(view.lines[5].text, "… 25 more lines");
    }

    #[test]
    fn list_dir_accepts_strings_and_objects() {
        let result = json!({"entries": [
            {"name": "chaincode", "type": "directory"},
            {"name": "go.mod", "type": "file"},
            "README.md"
        ]});
        let view = render_result(&ToolKind::ListDir, &json!({}), Some(&result), None, 20);
        assert_eq!(view.title, "List .");
        assert_eq!(texts(&view), vec!["chaincode/", "go.mod", "README.md"]);
    }

    #[test]
    fn grep_matches_show_location() {
        let result = json!([{"file": "asset.go", "line": 12, "content": "  func Init() {"}]);
        let view = render_result(
            &ToolKind::GrepSearch,
            &json!({"query": "Init", "include_pattern": "*.go"}),
            Some(&result),
            None,
            20,
        );
        assert_eq!(view.title, "Search \"Init\" in *.go");
        assert_eq!(texts(&view), vec!["asset.go:12: func Init() {"]);
    }

    #[test]
    fn empty_search_says_so() {
        let view = render_result(
            &ToolKind::FileSearch,
            &json!({"query": "zzz"}),
            Some(&json!([])),
            None,
            20,
        );
        assert_eq!(texts(&view), vec!["no results"]);
    }

    #[test]
    fn failing_command_is_error_toned() {
        let result = json!({"stdout": "building...", "stderr": "undefined: foo", "exit_code": 2});
        let view = render_result(
            &ToolKind::RunTerminalCmd,
            &json!({"command": "go build ./..."}),
            Some(&result),
            None,
            20,
        );
        assert_eq!(view.title, "Run go build ./...");
        assert_eq!(view.tone, Tone::Error);
        assert_eq!(
            texts(&view),
            vec!["building...", "undefined: foo", "exit code 2"]
        );
    }

    #[test]
    fn unknown_tool_falls_back_to_pretty_json() {
        let kind = ToolKind::from_name("deploy_chaincode");
        let view = render_result(&kind, &json!({}), Some(&json!({"txId": "abc"})), None, 20);
        assert_eq!(view.title, "deploy_chaincode");
        assert_eq!(texts(&view), vec!["{", "  \"txId\": \"abc\"", "}"]);
    }

    #[test]
    fn render_call_follows_status() {
        let mut call = ToolCall::new("1", "run_terminal_cmd");
        call.parsed = json!({"command": "ls"});
        call.status = ToolStatus::Executing;
        let view = render_call(&call, 20);
        assert_eq!(view.tone, Tone::Running);
        assert_eq!(texts(&view), vec!["$ ls"]);

        call.status = ToolStatus::Completed;
        call.result = Some(json!("a.go\nb.go"));
        let view = render_call(&call, 20);
        assert_eq!(view.tone, Tone::Success);
        assert_eq!(texts(&view), vec!["a.go", "b.go"]);
    }
}
