//! Logical jobs.

use std::fmt;

use weft_catalog::{LogicalFile, Namespace, Profiles};

/// One entry of a job's argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Literal(String),
    /// A logical file, rendered as its name once planned.
    File(LogicalFile),
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::File(file) => f.write_str(file.name()),
        }
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for Argument {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl From<&LogicalFile> for Argument {
    fn from(file: &LogicalFile) -> Self {
        Self::File(file.clone())
    }
}

impl From<LogicalFile> for Argument {
    fn from(file: LogicalFile) -> Self {
        Self::File(file)
    }
}

/// A declared output file and what happens to it after the job finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub file: LogicalFile,
    /// Transfer the file to the output site.
    pub stage_out: bool,
    /// Record the persisted copy as a replica.
    pub register_replica: bool,
}

/// A logical job: one invocation of a transformation.
///
/// The identifier is fixed once the job is added to a workflow. Arguments,
/// files and profiles stay editable until the workflow is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: String,
    /// Name of the transformation to invoke.
    pub transformation: String,
    pub arguments: Vec<Argument>,
    pub inputs: Vec<LogicalFile>,
    pub outputs: Vec<OutputFile>,
    pub profiles: Profiles,
}

impl Job {
    /// A job invoking `transformation`. Without [`Job::with_id`] the workflow
    /// assigns an identifier when the job is added.
    pub fn new(transformation: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            transformation: transformation.into(),
            arguments: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            profiles: Profiles::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.id = id;
    }

    pub fn add_arg(mut self, arg: impl Into<Argument>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn add_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn add_inputs<I, F>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<LogicalFile>,
    {
        self.inputs.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn add_outputs<I, F>(mut self, files: I, stage_out: bool, register_replica: bool) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<LogicalFile>,
    {
        self.outputs
            .extend(files.into_iter().map(|file| OutputFile {
                file: file.into(),
                stage_out,
                register_replica,
            }));
        self
    }

    pub fn add_profile(
        mut self,
        namespace: Namespace,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.profiles.insert(namespace, key, value);
        self
    }

    /// Shorthand for an `env` namespace profile.
    pub fn add_env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_profile(Namespace::Env, key, value)
    }

    /// Whether the job declares `lfn` as an input.
    pub fn uses_input(&self, lfn: &str) -> bool {
        self.inputs.iter().any(|f| f.name() == lfn)
    }

    /// Argument list with file references rendered as file names.
    pub fn rendered_arguments(&self) -> Vec<String> {
        self.arguments.iter().map(ToString::to_string).collect()
    }
}
