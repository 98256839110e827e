use crate::error::{Result, StackError};
use crate::expr::Expr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};

pub const SOURCE_STAGE: &str = "Source";
pub const DEPLOY_STAGE: &str = "Deploy";
pub const SOURCE_ARTIFACT: &str = "SourceArtifact";
pub const DEPLOY_ARTIFACT: &str = "DeployArtifact";

// ---------------------------------------------------------------------------
// ActionProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionProvider {
    CodeCommit,
    CodeBuild,
}

impl ActionProvider {
    pub fn category(self) -> &'static str {
        match self {
            ActionProvider::CodeCommit => "Source",
            ActionProvider::CodeBuild => "Build",
        }
    }

    pub fn provider(self) -> &'static str {
        match self {
            ActionProvider::CodeCommit => "CodeCommit",
            ActionProvider::CodeBuild => "CodeBuild",
        }
    }

    /// Calls the orchestrator role makes to run an action of this kind.
    pub fn required_permissions(self) -> &'static [&'static str] {
        match self {
            ActionProvider::CodeCommit => &[
                "codecommit:GetBranch",
                "codecommit:GetCommit",
                "codecommit:UploadArchive",
                "codecommit:GetUploadArchiveStatus",
            ],
            ActionProvider::CodeBuild => &["codebuild:StartBuild", "codebuild:BatchGetBuilds"],
        }
    }
}

// ---------------------------------------------------------------------------
// Action / Stage / PipelineDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub name: String,
    pub run_order: u32,
    pub provider: ActionProvider,
    pub input_artifacts: Vec<String>,
    pub output_artifacts: Vec<String>,
    pub configuration: BTreeMap<String, Expr>,
}

impl Action {
    pub fn new(name: impl Into<String>, provider: ActionProvider) -> Self {
        Self {
            name: name.into(),
            run_order: 1,
            provider,
            input_artifacts: Vec::new(),
            output_artifacts: Vec::new(),
            configuration: BTreeMap::new(),
        }
    }

    pub fn run_order(mut self, order: u32) -> Self {
        self.run_order = order;
        self
    }

    pub fn input(mut self, artifact: impl Into<String>) -> Self {
        self.input_artifacts.push(artifact.into());
        self
    }

    pub fn output(mut self, artifact: impl Into<String>) -> Self {
        self.output_artifacts.push(artifact.into());
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: Expr) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    fn to_value(&self) -> Value {
        let configuration: Map<String, Value> = self
            .configuration
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        let names = |list: &[String]| -> Vec<Value> {
            list.iter().map(|n| json!({ "Name": n })).collect()
        };
        json!({
            "Name": self.name,
            "ActionTypeId": {
                "Category": self.provider.category(),
                "Owner": "AWS",
                "Provider": self.provider.provider(),
                "Version": "1",
            },
            "Configuration": configuration,
            "InputArtifacts": names(&self.input_artifacts),
            "OutputArtifacts": names(&self.output_artifacts),
            "RunOrder": self.run_order,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Output artifacts declared by every action in the stage.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .flat_map(|a| a.output_artifacts.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDefinition {
    pub restart_execution_on_update: bool,
    pub stages: Vec<Stage>,
}

impl PipelineDefinition {
    /// `Source` (CodeCommit) followed by `Deploy` (CodeBuild).
    pub fn two_stage(repository: Expr, branch: Expr, build_project: Expr) -> Self {
        let source = Action::new("Source", ActionProvider::CodeCommit)
            .config("RepositoryName", repository)
            .config("BranchName", branch)
            .config("PollForSourceChanges", Expr::lit("false"))
            .output(SOURCE_ARTIFACT);
        let deploy = Action::new("Deploy", ActionProvider::CodeBuild)
            .config("ProjectName", build_project)
            .input(SOURCE_ARTIFACT)
            .output(DEPLOY_ARTIFACT);
        Self {
            restart_execution_on_update: true,
            stages: vec![
                Stage::new(SOURCE_STAGE, vec![source]),
                Stage::new(DEPLOY_STAGE, vec![deploy]),
            ],
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Every structural problem with the definition, in stage order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.stages.is_empty() {
            problems.push("pipeline must have at least one stage".to_string());
        }

        let mut stage_names = HashSet::new();
        let mut produced: HashSet<&str> = HashSet::new();

        for stage in &self.stages {
            if !stage_names.insert(stage.name.as_str()) {
                problems.push(format!("duplicate stage name '{}'", stage.name));
            }
            if stage.actions.is_empty() {
                problems.push(format!("stage '{}' has no actions", stage.name));
            }

            let mut action_names = HashSet::new();
            let mut previous: Option<u32> = None;
            // Outputs of lower run-orders in this stage become visible only
            // once the run-order advances.
            let mut pending: Vec<&str> = Vec::new();

            for action in &stage.actions {
                if !action_names.insert(action.name.as_str()) {
                    problems.push(format!(
                        "duplicate action name '{}' in stage '{}'",
                        action.name, stage.name
                    ));
                }
                if action.run_order == 0 {
                    problems.push(format!(
                        "action '{}' in stage '{}' has run_order 0 (must be >= 1)",
                        action.name, stage.name
                    ));
                }
                if let Some(prev) = previous {
                    if action.run_order <= prev {
                        problems.push(format!(
                            "action '{}' in stage '{}' has run_order {} which does not follow {}",
                            action.name, stage.name, action.run_order, prev
                        ));
                    }
                }
                if previous.is_some_and(|p| action.run_order > p) {
                    produced.extend(pending.drain(..));
                }
                previous = Some(action.run_order);

                for input in &action.input_artifacts {
                    if !produced.contains(input.as_str()) {
                        problems.push(format!(
                            "action '{}' in stage '{}' consumes '{}' which no earlier action produces",
                            action.name, stage.name, input
                        ));
                    }
                }
                for output in &action.output_artifacts {
                    if produced.contains(output.as_str()) || pending.contains(&output.as_str()) {
                        problems.push(format!("artifact '{output}' is produced more than once"));
                    }
                    pending.push(output.as_str());
                }
            }
            produced.extend(pending.drain(..));
        }
        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StackError::InvalidDefinition(problems.join("; ")))
        }
    }

    pub fn stages_value(&self) -> Value {
        let stages: Vec<Value> = self
            .stages
            .iter()
            .map(|s| {
                let actions: Vec<Value> = s.actions.iter().map(Action::to_value).collect();
                json!({ "Name": s.name, "Actions": actions })
            })
            .collect();
        Value::Array(stages)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
