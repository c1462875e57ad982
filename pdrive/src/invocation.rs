//! Command line construction for a single attempt.

use pdrive_common::{InvocationConfig, PORT_OPTION, PORT_OPTION_SECOND, TestCase};

/// Fully expanded argument vector for one attempt. Element 0 is the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    argv: Vec<String>,
}

impl Invocation {
    /// Assemble the command line for `case` with the given port pair.
    ///
    /// Layout: program, prefix args, policy option, both port options,
    /// suffix args, test id.
    pub fn build(config: &InvocationConfig, case: &TestCase, ports: (u16, u16)) -> Self {
        let opt = &config.option_prefix;
        let policy_path = config.policy_dir.join(&case.policy_file);

        let mut argv = Vec::with_capacity(config.prefix_args.len() + config.suffix_args.len() + 5);
        argv.push(config.program.clone());
        argv.extend(config.prefix_args.iter().cloned());
        argv.push(format!(
            "{opt}{}={}",
            config.policy_option,
            policy_path.display()
        ));
        argv.push(format!("{opt}{PORT_OPTION}={}", ports.0));
        argv.push(format!("{opt}{PORT_OPTION_SECOND}={}", ports.1));
        argv.extend(config.suffix_args.iter().cloned());
        argv.push(case.test_id.clone());

        Self { argv }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Arguments joined by single spaces, as recorded in diagnostic files.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    /// Build the tokio command for this invocation.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.program());
        cmd.args(self.args());
        cmd
    }
}
