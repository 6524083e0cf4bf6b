//! Build targets: a staleness check and a build step per kind.

use std::path::{Path, PathBuf};

use futures::{FutureExt, future::BoxFuture};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    config::BuildOptions,
    error::MakeError,
    extract::Extractor,
    runner::{Cmd, CommandRunner},
};

/// Copy and hash buffer size.
const CHUNK_SIZE: usize = 64 * 1024;

/// What a target builds and how it decides it is stale.
#[derive(Debug, Clone)]
pub enum TargetKind {
    /// Command sequence. Always stale.
    Shell {
        commands: Vec<Cmd>,
        env: Vec<(String, String)>,
    },
    /// Container image build. Always stale; the engine does the caching.
    ImageBuild {
        docker: Cmd,
        context: PathBuf,
        file: PathBuf,
        tag: String,
        build_args: Vec<(String, String)>,
    },
    /// Detached container. Stale unless it is running.
    ContainerRun {
        docker: Cmd,
        name: String,
        image: String,
        args: Vec<String>,
    },
    /// Container removal. Stale while the container exists.
    ContainerStop { docker: Cmd, name: String },
    /// `compose up -d`. Always stale.
    ComposeUp {
        compose: Cmd,
        file: PathBuf,
        env: Vec<(String, String)>,
    },
    /// `compose down`. Always stale.
    ComposeDown { compose: Cmd, file: PathBuf },
    /// Stale iff the directory is missing.
    MakeDir { path: PathBuf },
    /// Stale iff the destination is missing or its hash differs.
    FileCopy { src: PathBuf, dst: PathBuf },
    /// Print a slice of a container's logs. Always stale.
    LogExtract {
        docker: Cmd,
        container: String,
        label: String,
        extractor: Extractor,
    },
    /// Ordered sub-targets. Stale iff any child is.
    Composite(Vec<Target>),
}

/// A named buildable unit.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    pub deps: Vec<String>,
    pub description: String,
    pub kind: TargetKind,
}

/// What a target needs while checking or building.
pub struct BuildContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub options: BuildOptions,
}

impl<'a> BuildContext<'a> {
    pub fn new(runner: &'a dyn CommandRunner, options: BuildOptions) -> Self {
        Self { runner, options }
    }

    /// Run a mutating command, or print it on a dry run.
    async fn run(&self, cmd: &Cmd, env: &[(String, String)]) -> Result<(), MakeError> {
        if self.options.dry_run {
            println!("[dry-run] {cmd}");
            return Ok(());
        }
        tracing::info!(command = %cmd, "Running");
        let code = self
            .runner
            .run(cmd, env)
            .await
            .map_err(|source| MakeError::Spawn {
                command: cmd.to_string(),
                source,
            })?;
        if code == Some(0) {
            Ok(())
        } else {
            Err(MakeError::CommandFailed {
                command: cmd.to_string(),
                code,
            })
        }
    }

    /// Run a read-only command and return its stdout. Runs on dry runs too.
    async fn query(&self, cmd: &Cmd) -> Result<String, MakeError> {
        tracing::debug!(command = %cmd, "Querying");
        let output = self
            .runner
            .capture(cmd)
            .await
            .map_err(|source| MakeError::Spawn {
                command: cmd.to_string(),
                source,
            })?;
        if !output.success() {
            return Err(MakeError::CommandFailed {
                command: cmd.to_string(),
                code: output.code,
            });
        }
        Ok(output.stdout)
    }

    async fn container_listed(&self, docker: &Cmd, name: &str, all: bool) -> Result<bool, MakeError> {
        let listing = self.query(&list_containers(docker, name, all)).await?;
        Ok(listing.lines().any(|line| line.trim() == name))
    }
}

/// `docker ps` filtered on an exact container name.
pub(crate) fn list_containers(docker: &Cmd, name: &str, all: bool) -> Cmd {
    let mut cmd = docker.clone().arg("ps");
    if all {
        cmd = cmd.arg("--all");
    }
    cmd.args([
        "--filter".to_string(),
        format!("name=^/{name}$"),
        "--format".to_string(),
        "{{.Names}}".to_string(),
    ])
}

impl Target {
    pub fn new(id: &str, description: &str, kind: TargetKind) -> Self {
        Self {
            id: id.to_string(),
            deps: Vec::new(),
            description: description.to_string(),
            kind,
        }
    }

    #[must_use]
    pub fn with_deps(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(ToString::to_string).collect();
        self
    }

    /// Whether this target must be rebuilt.
    pub fn is_outdated<'a>(&'a self, ctx: &'a BuildContext<'a>) -> BoxFuture<'a, Result<bool, MakeError>> {
        async move {
            match &self.kind {
                TargetKind::Shell { .. }
                | TargetKind::ImageBuild { .. }
                | TargetKind::ComposeUp { .. }
                | TargetKind::ComposeDown { .. }
                | TargetKind::LogExtract { .. } => Ok(true),
                TargetKind::ContainerRun { docker, name, .. } => {
                    Ok(!ctx.container_listed(docker, name, false).await?)
                }
                TargetKind::ContainerStop { docker, name } => {
                    ctx.container_listed(docker, name, true).await
                }
                TargetKind::MakeDir { path } => Ok(!exists(path).await?),
                TargetKind::FileCopy { src, dst } => {
                    if !exists(dst).await? {
                        return Ok(true);
                    }
                    Ok(hash_file(src).await? != hash_file(dst).await?)
                }
                TargetKind::Composite(children) => {
                    for child in children {
                        if child.is_outdated(ctx).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        }
        .boxed()
    }

    /// Build this target; returns whether anything changed.
    pub fn build<'a>(&'a self, ctx: &'a BuildContext<'a>) -> BoxFuture<'a, Result<bool, MakeError>> {
        async move {
            match &self.kind {
                TargetKind::Shell { commands, env } => {
                    for cmd in commands {
                        ctx.run(cmd, env).await?;
                    }
                    Ok(true)
                }
                TargetKind::ImageBuild {
                    docker,
                    context,
                    file,
                    tag,
                    build_args,
                } => {
                    let mut cmd = docker.clone().args([
                        "build".to_string(),
                        "--platform".to_string(),
                        format!("linux/{}", ctx.options.arch.docker()),
                        "--tag".to_string(),
                        tag.clone(),
                        "--file".to_string(),
                        file.display().to_string(),
                    ]);
                    for (key, value) in build_args {
                        cmd = cmd.arg("--build-arg").arg(format!("{key}={value}"));
                    }
                    ctx.run(&cmd.arg(context.display().to_string()), &[]).await?;
                    Ok(true)
                }
                TargetKind::ContainerRun {
                    docker,
                    name,
                    image,
                    args,
                } => {
                    if ctx.container_listed(docker, name, true).await? {
                        ctx.run(&docker.clone().args(["rm", "--force", name.as_str()]), &[])
                            .await?;
                    }
                    let cmd = docker
                        .clone()
                        .args(["run", "--detach", "--name", name.as_str()])
                        .args(args.iter().cloned())
                        .arg(image.clone());
                    ctx.run(&cmd, &[]).await?;
                    Ok(true)
                }
                TargetKind::ContainerStop { docker, name } => {
                    ctx.run(&docker.clone().args(["stop", name.as_str()]), &[]).await?;
                    ctx.run(&docker.clone().args(["rm", name.as_str()]), &[]).await?;
                    Ok(true)
                }
                TargetKind::ComposeUp { compose, file, env } => {
                    let cmd = compose
                        .clone()
                        .arg("--file")
                        .arg(file.display().to_string())
                        .args(["up", "--detach"]);
                    ctx.run(&cmd, env).await?;
                    Ok(true)
                }
                TargetKind::ComposeDown { compose, file } => {
                    let cmd = compose
                        .clone()
                        .arg("--file")
                        .arg(file.display().to_string())
                        .arg("down");
                    ctx.run(&cmd, &[]).await?;
                    Ok(true)
                }
                TargetKind::MakeDir { path } => {
                    if ctx.options.dry_run {
                        println!("[dry-run] mkdir -p {}", path.display());
                        return Ok(true);
                    }
                    tracing::info!(path = %path.display(), "Creating directory");
                    tokio::fs::create_dir_all(path)
                        .await
                        .map_err(MakeError::io(path))?;
                    Ok(true)
                }
                TargetKind::FileCopy { src, dst } => {
                    if ctx.options.dry_run {
                        println!("[dry-run] cp {} {}", src.display(), dst.display());
                        return Ok(true);
                    }
                    tracing::info!(src = %src.display(), dst = %dst.display(), "Copying file");
                    copy_file(src, dst).await?;
                    Ok(true)
                }
                TargetKind::LogExtract {
                    docker,
                    container,
                    label,
                    extractor,
                } => {
                    let cmd = docker.clone().args(["logs", container.as_str()]);
                    let output = ctx.runner.capture(&cmd).await.map_err(|source| {
                        MakeError::Spawn {
                            command: cmd.to_string(),
                            source,
                        }
                    })?;
                    if !output.success() {
                        return Err(MakeError::CommandFailed {
                            command: cmd.to_string(),
                            code: output.code,
                        });
                    }
                    // Servers tend to log to stderr.
                    let text = format!("{}\n{}", output.stdout, output.stderr);
                    match extractor.extract(&text) {
                        Some(value) => {
                            println!("{label}: {value}");
                            Ok(true)
                        }
                        None => {
                            tracing::warn!(%container, "Could not find {label} in container logs");
                            Ok(false)
                        }
                    }
                }
                TargetKind::Composite(children) => {
                    let mut changed = false;
                    for child in children {
                        tracing::debug!(parent = %self.id, child = %child.id, "Building sub-target");
                        changed |= child.build(ctx).await?;
                    }
                    Ok(changed)
                }
            }
        }
        .boxed()
    }
}

async fn exists(path: &Path) -> Result<bool, MakeError> {
    tokio::fs::try_exists(path).await.map_err(MakeError::io(path))
}

async fn hash_file(path: &Path) -> Result<Vec<u8>, MakeError> {
    let mut file = tokio::fs::File::open(path).await.map_err(MakeError::io(path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(MakeError::io(path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

async fn copy_file(src: &Path, dst: &Path) -> Result<(), MakeError> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(MakeError::io(parent))?;
    }
    let mut input = tokio::fs::File::open(src).await.map_err(MakeError::io(src))?;
    let mut output = tokio::fs::File::create(dst).await.map_err(MakeError::io(dst))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = input.read(&mut buf).await.map_err(MakeError::io(src))?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await.map_err(MakeError::io(dst))?;
    }
    output.flush().await.map_err(MakeError::io(dst))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Arch, Os},
        runner::testing::RecordingRunner,
    };

    fn options(dry_run: bool) -> BuildOptions {
        BuildOptions {
            arch: Arch::X86_64,
            os: Os::Linux,
            dry_run,
            force: false,
        }
    }

    fn shell(id: &str, line: &str) -> Target {
        Target::new(
            id,
            "test shell",
            TargetKind::Shell {
                commands: vec![Cmd::new("echo").arg(line)],
                env: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_file_copy_with_equal_hashes_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("libbrane_cli.so");
        let dst = dir.path().join("build").join("libbrane_cli.so");
        std::fs::write(&src, b"library bytes").unwrap();
        std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
        std::fs::write(&dst, b"library bytes").unwrap();

        let runner = RecordingRunner::default();
        let ctx = BuildContext::new(&runner, options(false));
        let target = Target::new(
            "libbrane",
            "copy",
            TargetKind::FileCopy {
                src: src.clone(),
                dst: dst.clone(),
            },
        );
        assert!(!target.is_outdated(&ctx).await.unwrap());

        std::fs::write(&src, b"new library bytes").unwrap();
        assert!(target.is_outdated(&ctx).await.unwrap());
        assert!(target.build(&ctx).await.unwrap());
        assert_eq!(std::fs::read(&dst).unwrap(), b"new library bytes");
        assert!(!target.is_outdated(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_copy_creates_missing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &data).unwrap();
        let dst = dir.path().join("nested").join("dst.bin");

        let runner = RecordingRunner::default();
        let ctx = BuildContext::new(&runner, options(false));
        let target = Target::new("copy", "copy", TargetKind::FileCopy { src, dst: dst.clone() });
        assert!(target.is_outdated(&ctx).await.unwrap());
        target.build(&ctx).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), data);
    }

    #[tokio::test]
    async fn test_make_dir_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let runner = RecordingRunner::default();

        let target = Target::new("data-dir", "dir", TargetKind::MakeDir { path: path.clone() });
        let dry = BuildContext::new(&runner, options(true));
        assert!(target.is_outdated(&dry).await.unwrap());
        assert!(target.build(&dry).await.unwrap());
        assert!(!path.exists());

        let real = BuildContext::new(&runner, options(false));
        target.build(&real).await.unwrap();
        assert!(path.is_dir());
        assert!(!target.is_outdated(&real).await.unwrap());
    }

    #[tokio::test]
    async fn test_composite_stale_if_any_child_and_builds_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present");
        std::fs::create_dir(&present).unwrap();

        let runner = RecordingRunner::default();
        let docker = Cmd::new("docker");
        runner.answer(&list_containers(&docker, "brane-ide", false).to_string(), "brane-ide\n");
        runner.answer(&list_containers(&docker, "brane-ide", true).to_string(), "brane-ide\n");
        let ctx = BuildContext::new(&runner, options(false));

        let running = Target::new(
            "start-ide",
            "run",
            TargetKind::ContainerRun {
                docker,
                name: "brane-ide".to_string(),
                image: "brane-ide:latest".to_string(),
                args: Vec::new(),
            },
        );
        assert!(!running.is_outdated(&ctx).await.unwrap());

        let mixed = Target::new(
            "mixed",
            "composite",
            TargetKind::Composite(vec![running, shell("stale", "second")]),
        );
        let fresh = Target::new("fresh", "dir", TargetKind::MakeDir { path: present });
        let fresh_only = Target::new("fresh-only", "composite", TargetKind::Composite(vec![fresh]));

        assert!(mixed.is_outdated(&ctx).await.unwrap());
        assert!(!fresh_only.is_outdated(&ctx).await.unwrap());

        // Every child is built, the fresh one included, in declared order.
        assert!(mixed.build(&ctx).await.unwrap());
        assert_eq!(
            runner.runs(),
            vec![
                "docker rm --force brane-ide",
                "docker run --detach --name brane-ide brane-ide:latest",
                "echo second",
            ]
        );
    }

    #[tokio::test]
    async fn test_container_run_staleness_and_restart() {
        let runner = RecordingRunner::default();
        let docker = Cmd::new("docker");
        let target = Target::new(
            "start-ide",
            "run",
            TargetKind::ContainerRun {
                docker: docker.clone(),
                name: "brane-ide".to_string(),
                image: "brane-ide:latest".to_string(),
                args: vec!["--publish".to_string(), "8888:8888".to_string()],
            },
        );
        let ctx = BuildContext::new(&runner, options(false));

        // Not listed at all: stale, and no removal before the run.
        assert!(target.is_outdated(&ctx).await.unwrap());
        target.build(&ctx).await.unwrap();
        assert_eq!(
            runner.runs(),
            vec!["docker run --detach --name brane-ide --publish 8888:8888 brane-ide:latest"]
        );

        runner.answer(&list_containers(&docker, "brane-ide", false).to_string(), "brane-ide\n");
        runner.answer(&list_containers(&docker, "brane-ide", true).to_string(), "brane-ide\n");
        assert!(!target.is_outdated(&ctx).await.unwrap());

        runner.runs.lock().unwrap().clear();
        target.build(&ctx).await.unwrap();
        assert_eq!(runner.runs()[0], "docker rm --force brane-ide");
    }

    #[tokio::test]
    async fn test_failed_command_aborts_with_command_line() {
        let runner = RecordingRunner::default();
        runner.fail_on("docker compose --file docker-compose.yml down");
        let ctx = BuildContext::new(&runner, options(false));
        let target = Target::new(
            "down",
            "compose down",
            TargetKind::ComposeDown {
                compose: Cmd::parse("docker compose").unwrap(),
                file: PathBuf::from("docker-compose.yml"),
            },
        );

        let err = target.build(&ctx).await.unwrap_err();
        let MakeError::CommandFailed { command, code } = err else {
            panic!("Wrong error: {err}");
        };
        assert_eq!(command, "docker compose --file docker-compose.yml down");
        assert_eq!(code, Some(1));
    }

    #[tokio::test]
    async fn test_dry_run_prints_instead_of_running() {
        let runner = RecordingRunner::default();
        let ctx = BuildContext::new(&runner, options(true));
        let target = Target::new(
            "image",
            "image",
            TargetKind::ImageBuild {
                docker: Cmd::new("docker"),
                context: PathBuf::from("."),
                file: PathBuf::from("Dockerfile"),
                tag: "brane-ide:latest".to_string(),
                build_args: Vec::new(),
            },
        );
        assert!(target.build(&ctx).await.unwrap());
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn test_log_extract() {
        let runner = RecordingRunner::default();
        runner.answer(
            "docker logs brane-ide",
            "noise\n    http://127.0.0.1:8888/lab?token=abc\n",
        );
        let ctx = BuildContext::new(&runner, options(false));
        let extractor = Extractor::Chain(vec![Extractor::line("token=", -1), Extractor::word(-1)]);
        let found = Target::new(
            "ide-token",
            "token",
            TargetKind::LogExtract {
                docker: Cmd::new("docker"),
                container: "brane-ide".to_string(),
                label: "Notebook URL".to_string(),
                extractor: extractor.clone(),
            },
        );
        assert!(found.build(&ctx).await.unwrap());

        let missing = Target::new(
            "ide-token",
            "token",
            TargetKind::LogExtract {
                docker: Cmd::new("docker"),
                container: "other".to_string(),
                label: "Notebook URL".to_string(),
                extractor,
            },
        );
        assert!(!missing.build(&ctx).await.unwrap());
    }
}
