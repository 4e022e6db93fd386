//! Spawn-mode selection and child argument construction (spec.md §4.2).

use std::collections::HashMap;
use std::sync::LazyLock;

use conduit_core::permissions::PermissionMode;
use regex::Regex;

use crate::errors::{Result, RunnerError};

/// How the child process is launched (spec.md §4.2 "Spawn modes").
#[derive(Clone, Debug)]
pub enum SpawnMode {
    /// Plain pipes on stdin/stdout/stderr. The default.
    Direct,
    /// The child is given a controlling TTY via `portable-pty`, for
    /// children that refuse to run without one.
    Pty,
    /// Launch a fresh, rootless container and exec the child inside it.
    ContainerNew {
        /// Container runtime binary, e.g. `podman` or `docker`.
        runtime_bin: String,
        /// Image to launch.
        image: String,
    },
    /// Exec the child into an already-running container. Used when a
    /// session resumes inside a container started by a prior turn.
    ContainerExec {
        /// Container runtime binary.
        runtime_bin: String,
        /// Target container id.
        container_id: String,
    },
}

/// One bind mount applied to a container spawn (spec.md §6.5).
#[derive(Clone, Debug)]
pub struct BindMount {
    /// Host path.
    pub source: String,
    /// In-container path.
    pub target: String,
    /// `"ro"` or `"rw"`.
    pub mode: &'static str,
}

/// Options accepted by [`crate::Runner::start`] (spec.md §4.2).
#[derive(Clone, Debug)]
pub struct StartOptions {
    /// Path to the child binary.
    pub child_binary: String,
    /// Working directory passed to the child.
    pub working_dir: String,
    /// Upstream session id to resume, if any.
    pub upstream_session_id: Option<String>,
    /// Permission mode to start the child under.
    pub permission_mode: Option<PermissionMode>,
    /// Tool names explicitly allowed.
    pub allowed_tools: Vec<String>,
    /// Tool names explicitly disallowed.
    pub disallowed_tools: Vec<String>,
    /// Path to the ephemeral capability-server config file
    /// (`conduit-capability`, spec.md §4.6).
    pub capability_config_path: Option<String>,
    /// Tool name the child should invoke to request permission.
    pub capability_tool_name: Option<String>,
    /// Extended-thinking flag.
    pub extended_thinking: bool,
    /// Attached image paths for the initial prompt.
    pub image_attachments: Vec<String>,
    /// Bind mounts, applied only for container spawn modes.
    pub bind_mounts: Vec<BindMount>,
    /// Environment variables forwarded to the child.
    pub env: HashMap<String, String>,
    /// How to launch the child.
    pub spawn_mode: SpawnMode,
}

/// A fully resolved program + argument vector, after spawn-mode wrapping
/// and tool-name validation.
pub(crate) struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
    pub mode: SpawnMode,
}

static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-:/@.]+$").expect("valid regex"));

/// Validate a tool name per spec.md §4.2: must match
/// `[A-Za-z0-9_\-:/@.]+` and must not begin with `-` (which would be
/// read as a flag by the child's argument parser).
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') || !TOOL_NAME.is_match(name) {
        return Err(RunnerError::InvalidToolName(name.to_owned()));
    }
    Ok(())
}

/// Build the child's argument vector (spec.md §4.2 "Child argument
/// construction"), validating every tool name first.
pub(crate) fn build_args(opts: &StartOptions) -> Result<Vec<String>> {
    for name in opts
        .allowed_tools
        .iter()
        .chain(opts.disallowed_tools.iter())
        .chain(opts.capability_tool_name.iter())
    {
        validate_tool_name(name)?;
    }

    let mut args = vec![String::new()]; // empty positional prompt; the real prompt goes over stdin
    args.push("--ndjson-input".into());
    args.push("--ndjson-output".into());
    args.push("--verbose".into());
    args.push("--cwd".into());
    args.push(opts.working_dir.clone());

    if let Some(uid) = &opts.upstream_session_id {
        args.push("--resume".into());
        args.push(uid.clone());
    }
    if let Some(mode) = opts.permission_mode {
        args.push("--permission-mode".into());
        args.push(mode.as_str().into());
    }
    if let Some(tool) = &opts.capability_tool_name {
        args.push("--capability-tool".into());
        args.push(tool.clone());
    }
    if let Some(path) = &opts.capability_config_path {
        args.push("--capability-config".into());
        args.push(path.clone());
    }
    if opts.extended_thinking {
        args.push("--extended-thinking".into());
    }
    for name in &opts.allowed_tools {
        args.push("--allow-tool".into());
        args.push(name.clone());
    }
    for name in &opts.disallowed_tools {
        args.push("--disallow-tool".into());
        args.push(name.clone());
    }
    for path in &opts.image_attachments {
        args.push("--image".into());
        args.push(path.clone());
    }
    Ok(args)
}

/// Resolve the final program + args for the selected spawn mode
/// (spec.md §6.5: container modes wrap the child invocation, they never
/// replace it — `conduit-runner` builds the command line only, it does
/// not manage container lifecycle).
pub(crate) fn build_command(opts: &StartOptions) -> Result<ChildCommand> {
    let child_args = build_args(opts)?;
    let env: Vec<(String, String)> = opts.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let (program, args) = match &opts.spawn_mode {
        SpawnMode::Direct | SpawnMode::Pty => (opts.child_binary.clone(), child_args),
        SpawnMode::ContainerNew { runtime_bin, image } => {
            let mut args = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];
            for mount in &opts.bind_mounts {
                args.push("--mount".into());
                args.push(format!(
                    "type=bind,source={},target={},readonly={}",
                    mount.source,
                    mount.target,
                    mount.mode == "ro"
                ));
            }
            for (k, v) in &env {
                args.push("--env".into());
                args.push(format!("{k}={v}"));
            }
            args.push(image.clone());
            args.push(opts.child_binary.clone());
            args.extend(child_args);
            (runtime_bin.clone(), args)
        }
        SpawnMode::ContainerExec { runtime_bin, container_id } => {
            let mut args = vec!["exec".to_string(), "-i".to_string(), container_id.clone()];
            args.push(opts.child_binary.clone());
            args.extend(child_args);
            (runtime_bin.clone(), args)
        }
    };

    Ok(ChildCommand {
        program,
        args,
        working_dir: opts.working_dir.clone(),
        env,
        mode: opts.spawn_mode.clone(),
    })
}
