use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use petgraph::graph::NodeIndex;

use crate::blueprint::Pipeline;
use crate::engine::{Edge, TaskExecution, TaskId};

/// Run diagnostics.
///
/// This struct is returned by [`Pipeline::run`] and records what happened to
/// every task: how long it took, whether it was skipped, and which live
/// outputs were stopped, in the order they were stopped.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// A map of task node indices to their execution metrics.
    pub execution_times: HashMap<NodeIndex, TaskExecution>,
    /// Tasks which did not run.
    pub skipped: HashSet<NodeIndex>,
    /// Tasks which returned an error or panicked.
    pub failed: HashSet<NodeIndex>,
    /// Subjects of stop-after relations, in the order they were stopped.
    pub stopped: Vec<NodeIndex>,
}

impl Diagnostics {
    pub fn execution(&self, task: impl Into<TaskId>) -> Option<&TaskExecution> {
        self.execution_times.get(&task.into().index())
    }

    pub fn was_skipped(&self, task: impl Into<TaskId>) -> bool {
        self.skipped.contains(&task.into().index())
    }

    pub fn was_stopped(&self, task: impl Into<TaskId>) -> bool {
        self.stopped.contains(&task.into().index())
    }

    /// Renders the executed graph as a Mermaid diagram.
    ///
    /// * **Green**: Ran
    /// * **Red**: Failed
    /// * **Blue**: Skipped
    pub fn render_mermaid(&self, pipeline: &Pipeline) -> String {
        let mut f = String::new();
        writeln!(f, "graph LR").unwrap();

        for index in pipeline.graph.node_indices() {
            let name = pipeline.graph[index].name().replace('"', "\\\"");

            let (label, color) = if self.failed.contains(&index) {
                ("failed".to_string(), "#FF6B6B")
            } else if let Some(exec) = self.execution_times.get(&index) {
                (format!("{:.2?}", exec.duration), "#8FD694")
            } else {
                ("skipped".to_string(), "#ADD8E6")
            };

            writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label).unwrap();
            writeln!(f, "    style {} fill:{}", index.index(), color).unwrap();
        }

        for edge in pipeline.graph.raw_edges() {
            let arrow = match edge.weight {
                Edge::Data => "-->",
                Edge::Order => "-.->",
            };
            writeln!(
                f,
                "    {} {} {}",
                edge.source().index(),
                arrow,
                edge.target().index()
            )
            .unwrap();
        }

        for relation in &pipeline.stops {
            if self.stopped.contains(&relation.subject) {
                writeln!(
                    f,
                    "    {} -. \"stopped\" .-> {}",
                    relation.target.index(),
                    relation.subject.index()
                )
                .unwrap();
            }
        }

        f
    }
}

#[cfg(test)]
mod test {
    use crate::blueprint::Blueprint;
    use crate::core::Environment;

    #[test]
    fn mermaid_marks_skipped_tasks() {
        let mut blueprint = Blueprint::new();
        let ran = blueprint.task().name("ran").run(|_| Ok(()));
        let gated = blueprint.task().name("gated").run(|_| Ok(()));
        blueprint.depends_on(gated, ran);
        blueprint.only_if(gated, |_| false);

        let pipeline = blueprint.finish();
        let diagnostics = pipeline.run(&Environment::new("/")).unwrap();
        let text = diagnostics.render_mermaid(&pipeline);

        assert!(text.contains("1[\"gated\\nskipped\"]"));
        assert!(text.contains("style 0 fill:#8FD694"));
        assert!(text.contains("0 -.-> 1"));
    }
}
