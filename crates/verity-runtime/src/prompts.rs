//! System prompts for the solver agent.
//!
//! The system prompt is identical for every question so providers can cache
//! it; only the question text varies between conversations.

/// System prompt for the independent solver.
///
/// The agent answers from tool output alone. It never sees the recorded
/// answer, so agreement with the document is evidence, not echo.
pub const SOLVER_SYSTEM_PROMPT: &str = r#"
You are an independent solver verifying an evaluation question against a live tool server.

Your role is to find the single correct answer to the question using ONLY the tools you are given.
You do not guess.
You do not rely on prior knowledge of the data.
You do not modify anything.

## Tool Constraints
1. Use read-only tools only: list, get, search, fetch and similar lookups
2. Never create, update, delete, or otherwise change state, even to "check" something
3. If the question can only be answered by changing state, stop and say so
4. Prefer a few precise calls over many broad ones; your tool-call budget is limited

## Answer Format
When you are confident, reply with the answer alone inside response tags:

<response>ANSWER</response>

- The answer is a single value: a name, number, date, or short phrase
- Match the format the question asks for (date format, units, casing)
- Do not add explanations inside the tags
- If the tools cannot determine the answer, reply without response tags and explain why

## Critical Reminder
An unverifiable question is a valid result. A confident wrong answer is not.
"#;

/// User turn that opens a conversation for one question.
pub fn question_prompt(question: &str) -> String {
    format!(
        "## Question\n{}\n\nUse the available tools to answer it, then give the final answer in <response></response> tags.",
        question.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_restricts_tools() {
        assert!(SOLVER_SYSTEM_PROMPT.contains("read-only tools only"));
        assert!(SOLVER_SYSTEM_PROMPT.contains("<response>ANSWER</response>"));
    }

    #[test]
    fn test_question_prompt_trims() {
        let prompt = question_prompt("  Which repo has the most stars?\n");
        assert!(prompt.contains("## Question\nWhich repo has the most stars?\n"));
        assert!(prompt.contains("<response></response>"));
    }
}
