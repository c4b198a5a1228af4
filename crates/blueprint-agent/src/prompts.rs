//! Prompt templates for the built-in stages.

use blueprint_core::artifact::{ImplementationTask, Plan, TaskPlan};

pub fn planner_prompt(user_prompt: &str) -> String {
    format!(
        "You are the PLANNER agent. Convert the user prompt into a complete engineering project plan.\n\
         Name the project, describe it, pick a tech stack, list its features and every file it needs \
         with the purpose of each file.\n\n\
         User request:\n{}",
        user_prompt
    )
}

pub fn architect_prompt(plan: &Plan) -> String {
    let files = plan
        .files
        .iter()
        .map(|f| format!("- {}: {}", f.path, f.purpose))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are the ARCHITECT agent. Break the project plan into explicit engineering tasks.\n\
         Produce exactly one implementation step per file in the plan, in the order the files \
         should be written. Each task description must name the variables, functions, classes \
         and components to define, and how this file depends on the files written before it.\n\n\
         Project: {}\n\
         Description: {}\n\
         Tech stack: {}\n\
         Features: {}\n\
         Files:\n{}",
        plan.name,
        plan.description,
        plan.techstack,
        plan.features.join(", "),
        files
    )
}

pub fn coder_prompt(
    task: &ImplementationTask,
    existing: &str,
    project_files: &[String],
    plan: &TaskPlan,
) -> String {
    let existing = if existing.is_empty() {
        "(file does not exist yet)".to_string()
    } else {
        existing.to_string()
    };
    let project_files = if project_files.is_empty() {
        "(none)".to_string()
    } else {
        project_files.join("\n")
    };

    format!(
        "You are the CODER agent. Implement one file of the project.\n\
         Return the complete contents of the file, not a diff. Keep names consistent with the \
         rest of the project.\n\n\
         File: {}\n\
         Task: {}\n\n\
         Files already in the project:\n{}\n\n\
         Total tasks in the project: {}\n\n\
         Current contents of {}:\n{}",
        task.filepath,
        task.task_description,
        project_files,
        plan.implementation_steps.len(),
        task.filepath,
        existing
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_test_utils::{sample_plan, sample_task_plan};

    #[test]
    fn test_prompts_carry_inputs() {
        assert!(planner_prompt("build a calculator").contains("build a calculator"));

        let plan = sample_plan(&["index.html", "app.js"]);
        let prompt = architect_prompt(&plan);
        assert!(prompt.contains("- index.html: implements index.html"));
        assert!(prompt.contains("Calculator"));

        let tasks = sample_task_plan(&["index.html"]);
        let prompt = coder_prompt(&tasks.implementation_steps[0], "", &[], &tasks);
        assert!(prompt.contains("File: index.html"));
        assert!(prompt.contains("(file does not exist yet)"));
    }
}
