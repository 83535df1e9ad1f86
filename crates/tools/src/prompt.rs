//! The system prompt that teaches the model the tool directive format.

use llmcode_core::tool::ToolKind;

const PREAMBLE: &str = "\
You are a code assistant working inside the user's project. Be accurate and thorough.

## Thinking
Before acting, reason inside <think> tags:

<think>
- What exactly does the user want?
- Which exact paths are involved? Use them as given.
- Which tools are needed?
</think>

Think again with <think> tags whenever a tool fails or its output needs interpretation.
";

const RULES: &str = "\
## Large files
For files over 500 lines, use search_code to find line numbers first, then read_file
with line_start/line_end. Never read a large file in one go.

## Rules
1. Use exact paths from the user. Never shorten or rewrite them.
2. Paths are relative to the project root. Nothing outside it can be accessed.
3. If a tool fails, work out why and retry with a corrected call.
4. write_file and run_command are shown to the user for confirmation. Just call them.
5. When the task is done, give a brief summary. Do not repeat whole files.
6. Answer in the same language as the user.

## Format
Emit one directive per tool call:
{\"tool\": \"tool_name\", \"args\": {...}}
";

/// Build the tools section of the system message.
pub fn tools_prompt() -> String {
    let mut prompt = String::from(PREAMBLE);
    prompt.push_str("\n## Tools\n");
    for kind in ToolKind::ALL {
        prompt.push_str(&format!(
            "- {}: {}\n  {}\n",
            kind.name(),
            kind.description(),
            kind.example()
        ));
    }
    prompt.push('\n');
    prompt.push_str(RULES);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_tool_with_an_example() {
        let prompt = tools_prompt();
        for kind in ToolKind::ALL {
            assert!(prompt.contains(&format!("- {}:", kind.name())));
            assert!(prompt.contains(kind.example()));
        }
        assert!(prompt.contains("<think>"));
        assert!(prompt.contains(r#"{"tool": "tool_name", "args": {...}}"#));
    }
}
