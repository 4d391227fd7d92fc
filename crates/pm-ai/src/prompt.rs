use chrono::NaiveDate;
use pm_core::types::TaskContext;
use std::fmt::Write;

const NO_DESCRIPTION: &str = "No description";
const NOT_SET: &str = "Not set";
const NO_WORKLOGS: &str = "No worklogs have been reported yet";

/// Renders the evaluation prompt for a task and its worklogs.
///
/// Output depends only on `context`; the closing template is what
/// [`crate::parser`] expects back.
pub fn build_prompt(context: &TaskContext) -> String {
    let task = &context.task;
    let mut prompt = String::new();

    prompt.push_str(
        "You are an expert reviewer of work progress. Analyse the task and its work \
         reports and judge how complete the task is.\n\n",
    );

    prompt.push_str("TASK:\n");
    let _ = writeln!(prompt, "- Title: {}", task.title);
    let _ = writeln!(
        prompt,
        "- Description: {}",
        task.description
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(NO_DESCRIPTION)
    );
    let _ = writeln!(prompt, "- Status: {}", task.status.as_str());
    let _ = writeln!(prompt, "- Priority: {}", task.priority.as_str());
    let _ = writeln!(prompt, "- Start date: {}", render_date(task.start_date));
    let _ = writeln!(prompt, "- Due date: {}", render_date(task.due_date));
    let _ = writeln!(
        prompt,
        "- Estimated hours: {}",
        task.estimate_hours
            .map_or_else(|| NOT_SET.to_string(), |hours| hours.to_string())
    );

    prompt.push_str("\nWORK REPORTS:\n");
    if context.worklogs.is_empty() {
        let _ = writeln!(prompt, "{NO_WORKLOGS}");
    } else {
        for log in &context.worklogs {
            let _ = writeln!(
                prompt,
                "- {}: {} ({} minutes)",
                log.created_at.format("%Y-%m-%d"),
                log.content,
                log.spent_minutes
            );
        }
    }

    prompt.push_str(
        "\nINSTRUCTIONS:\n\
         1. Judge completion from:\n   \
         - the amount of work done against what the task asks for\n   \
         - the quality of the work reports\n   \
         - progress against the schedule, when there is a due date\n   \
         - how specific and detailed the reports are\n\
         2. Keep the summary short and concrete: what was done and what is still missing.\n\n\
         REQUIRED RESPONSE FORMAT:\n\
         Answer with exactly these three lines and nothing else:\n\n\
         Score: [PERCENT]%\n\
         Summary: [REASON FOR THE SCORE]\n\
         Verdict: [pass/conditional/fail]\n\n\
         EXAMPLES:\n\
         Score: 80%\n\
         Summary: 8 of the 10 requested items are done, reports are detailed and on schedule\n\
         Verdict: pass\n\n\
         Score: 45%\n\
         Summary: About half of the work is done, reports need more detail\n\
         Verdict: conditional\n\n\
         Evaluate this task using exactly the format above:\n",
    );

    prompt
}

fn render_date(date: Option<NaiveDate>) -> String {
    date.map_or_else(|| NOT_SET.to_string(), |date| date.format("%Y-%m-%d").to_string())
}
