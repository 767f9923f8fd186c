use turbine_core::{AnchoredSystemPathBuf, PackageInfo, Result, TaskDefinition};

/// One concrete node of the task graph: a package, a task, its resolved
/// definition, and the command it will run (if the package declares one).
#[derive(Debug, Clone)]
pub struct PackageTask {
    pub task_id: String,
    pub task: String,
    pub package_name: String,
    pub package: PackageInfo,
    pub definition: TaskDefinition,
    pub command: Option<String>,
}

impl PackageTask {
    /// Repo-relative path of this task's captured log.
    pub fn log_file(&self) -> Result<AnchoredSystemPathBuf> {
        let name = format!("turbo-{}.log", self.task);
        Ok(self.package.dir.join_component(".turbo")?.join_component(&name)?)
    }

    /// Output globs joined onto the package directory, unix-style, as the
    /// cache layers expect them.
    pub fn repo_relative_output_globs(&self) -> Result<(Vec<String>, Vec<String>)> {
        let dir = self.package.dir.to_unix()?;
        let join = |glob: &String| -> Result<String> {
            Ok(if dir.as_str().is_empty() {
                glob.clone()
            } else {
                format!("{}/{}", dir.as_str(), glob)
            })
        };
        let inclusions = self
            .definition
            .outputs
            .inclusions
            .iter()
            .map(join)
            .collect::<Result<Vec<_>>>()?;
        let exclusions = self
            .definition
            .outputs
            .exclusions
            .iter()
            .map(join)
            .collect::<Result<Vec<_>>>()?;
        Ok((inclusions, exclusions))
    }

    /// The label shown before each output line of this task.
    pub fn output_prefix(&self) -> String {
        format!("{}:{}", self.package_name, self.task)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use turbine_core::TaskOutputs;

    use super::*;

    fn fixture() -> PackageTask {
        PackageTask {
            task_id: "web#build".into(),
            task: "build".into(),
            package_name: "web".into(),
            package: PackageInfo {
                name: "web".into(),
                dir: AnchoredSystemPathBuf::new("apps/web").unwrap(),
                scripts: BTreeMap::new(),
                dependencies: Vec::new(),
                external_deps_hash: String::new(),
            },
            definition: TaskDefinition {
                outputs: TaskOutputs {
                    inclusions: vec!["dist/**".into()],
                    exclusions: vec!["dist/cache/**".into()],
                },
                ..TaskDefinition::default()
            },
            command: Some("build-web".into()),
        }
    }

    #[test]
    fn log_file_lives_under_the_package_turbo_dir() {
        let task = fixture();
        assert_eq!(
            task.log_file().unwrap().to_unix().unwrap().as_str(),
            "apps/web/.turbo/turbo-build.log"
        );
    }

    #[test]
    fn output_globs_are_repo_relative() {
        let task = fixture();
        let (inclusions, exclusions) = task.repo_relative_output_globs().unwrap();
        assert_eq!(inclusions, vec!["apps/web/dist/**"]);
        assert_eq!(exclusions, vec!["apps/web/dist/cache/**"]);
    }
}
