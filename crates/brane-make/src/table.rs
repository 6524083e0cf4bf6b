//! The static target table.

use std::path::{Path, PathBuf};

use crate::{
    config::MakeConfig,
    error::MakeError,
    extract::Extractor,
    runner::Cmd,
    target::{Target, TargetKind},
};

/// Where the notebook image expects its mounts.
const IDE_DATA_DIR: &str = "/home/jovyan/data";
const IDE_NOTEBOOK_DIR: &str = "/home/jovyan/notebooks";
const IDE_CERTS_DIR: &str = "/certs";

fn make_dir(id: &str, description: &str, path: &Path) -> Target {
    Target::new(
        id,
        description,
        TargetKind::MakeDir {
            path: path.to_path_buf(),
        },
    )
}

/// Settings handed to the notebook container and compose.
fn ide_env(config: &MakeConfig) -> Vec<(String, String)> {
    vec![
        ("BRANE_API_ADDR".to_string(), config.api.clone()),
        ("BRANE_DRV_ADDR".to_string(), config.drv.clone()),
        ("BRANE_DATA_DIR".to_string(), IDE_DATA_DIR.to_string()),
        ("BRANE_CERTS_DIR".to_string(), IDE_CERTS_DIR.to_string()),
    ]
}

fn mount(host: &Path, container: &str) -> String {
    // Bind mounts need absolute host paths.
    let host = std::path::absolute(host).unwrap_or_else(|_| host.to_path_buf());
    format!("{}:{container}", host.display())
}

/// Build every known target from `config`.
///
/// # Errors
/// Returns error if a configured command line cannot be parsed.
pub fn targets(config: &MakeConfig) -> Result<Vec<Target>, MakeError> {
    let docker = Cmd::parse(&config.docker_cmd)?;
    let compose = Cmd::parse(&config.compose_cmd)?;

    let data_dir = make_dir("data-dir", "Create the notebook data directory", &config.data_dir);
    let notebook_dir = make_dir(
        "notebook-dir",
        "Create the notebook directory",
        &config.notebook_dir,
    );
    let certs_dir = make_dir("certs-dir", "Create the certificates directory", &config.certs_dir);

    let lib_name = config.options.os.dylib_name("brane_cli");

    let mut run_args = vec![
        "--publish".to_string(),
        format!("{}:8888", config.port),
        "--volume".to_string(),
        mount(&config.data_dir, IDE_DATA_DIR),
        "--volume".to_string(),
        mount(&config.notebook_dir, IDE_NOTEBOOK_DIR),
        "--volume".to_string(),
        mount(&config.certs_dir, IDE_CERTS_DIR),
    ];
    for (key, value) in ide_env(config) {
        run_args.push("--env".to_string());
        run_args.push(format!("{key}={value}"));
    }

    let mut compose_env = ide_env(config);
    compose_env.extend([
        ("BRANE_IDE_IMAGE".to_string(), config.image.clone()),
        ("BRANE_IDE_PORT".to_string(), config.port.to_string()),
        ("BRANE_IDE_DATA".to_string(), mount(&config.data_dir, IDE_DATA_DIR)),
        (
            "BRANE_IDE_NOTEBOOKS".to_string(),
            mount(&config.notebook_dir, IDE_NOTEBOOK_DIR),
        ),
        (
            "BRANE_IDE_CERTS".to_string(),
            mount(&config.certs_dir, IDE_CERTS_DIR),
        ),
    ]);

    Ok(vec![
        Target::new(
            "kernel",
            "Compile the BraneScript kernel binary",
            TargetKind::Shell {
                commands: vec![Cmd::new("cargo").args([
                    "build",
                    "--release",
                    "--package",
                    "bscript-kernel-app",
                ])],
                env: Vec::new(),
            },
        ),
        Target::new(
            "libbrane",
            "Bundle the compiler library into the build directory",
            TargetKind::FileCopy {
                src: config.lib.clone(),
                dst: config.build_dir.join(&lib_name),
            },
        ),
        data_dir.clone(),
        notebook_dir.clone(),
        certs_dir.clone(),
        Target::new(
            "dirs",
            "Create every host directory the notebook mounts",
            TargetKind::Composite(vec![data_dir, notebook_dir, certs_dir]),
        ),
        Target::new(
            "image",
            "Build the notebook container image",
            TargetKind::ImageBuild {
                docker: docker.clone(),
                context: PathBuf::from("."),
                file: PathBuf::from("Dockerfile"),
                tag: config.image.clone(),
                build_args: vec![
                    ("LIBBRANE".to_string(), config.build_dir.join(&lib_name).display().to_string()),
                    ("ARCH".to_string(), config.options.arch.brane().to_string()),
                ],
            },
        )
        .with_deps(&["kernel", "libbrane"]),
        Target::new(
            "start-ide",
            "Run the notebook container",
            TargetKind::ContainerRun {
                docker: docker.clone(),
                name: config.container.clone(),
                image: config.image.clone(),
                args: run_args,
            },
        )
        .with_deps(&["image", "dirs"]),
        Target::new(
            "stop-ide",
            "Stop and remove the notebook container",
            TargetKind::ContainerStop {
                docker: docker.clone(),
                name: config.container.clone(),
            },
        ),
        Target::new(
            "ide-token",
            "Print the notebook login URL from the container logs",
            TargetKind::LogExtract {
                docker,
                container: config.container.clone(),
                label: "Notebook URL".to_string(),
                extractor: Extractor::Chain(vec![
                    Extractor::line("token=", -1),
                    Extractor::word(-1),
                ]),
            },
        ),
        Target::new(
            "up",
            "Start the notebook through compose",
            TargetKind::ComposeUp {
                compose: compose.clone(),
                file: config.compose_file.clone(),
                env: compose_env,
            },
        )
        .with_deps(&["image", "dirs"]),
        Target::new(
            "down",
            "Stop the compose deployment",
            TargetKind::ComposeDown {
                compose,
                file: config.compose_file.clone(),
            },
        ),
        Target::new("all", "Build the kernel and the image", TargetKind::Composite(Vec::new()))
            .with_deps(&["kernel", "libbrane", "image"]),
    ])
}
