use std::path::Path;

use futures::future::FutureExt;
use protos::pb::build::bazel::remote::execution::v2 as remexec;

use super::{
    capture_all_outputs, create_output_parent_directories, normalize_path,
    recursively_chmod_directories, resolve_in_input_root,
};

fn command(
    working_directory: &str,
    output_files: &[&str],
    output_directories: &[&str],
) -> remexec::Command {
    remexec::Command {
        working_directory: working_directory.to_owned(),
        output_files: output_files.iter().map(|s| s.to_string()).collect(),
        output_directories: output_directories.iter().map(|s| s.to_string()).collect(),
        ..remexec::Command::default()
    }
}

/// Runs capture_all_outputs with recording callbacks that "find" every
/// path, returning the captured (normalized) paths and the result.
async fn run_capture(
    command: &remexec::Command,
) -> Result<(Vec<String>, Vec<String>, remexec::ActionResult), cas::ClientError> {
    let mut file_paths = Vec::new();
    let mut dir_paths = Vec::new();
    let mut result = remexec::ActionResult::default();

    capture_all_outputs(
        command,
        &mut result,
        |path| {
            file_paths.push(path.clone());
            futures::future::ready(Ok(remexec::OutputFile {
                path,
                ..remexec::OutputFile::default()
            }))
            .boxed()
        },
        |path| {
            dir_paths.push(path.clone());
            futures::future::ready(Ok(remexec::OutputDirectory {
                path,
                ..remexec::OutputDirectory::default()
            }))
            .boxed()
        },
    )
    .await?;

    Ok((file_paths, dir_paths, result))
}

#[tokio::test]
async fn captures_relative_to_working_directory() {
    let command = command("working-directory", &["file1.txt"], &["subdirectory"]);
    let (file_paths, dir_paths, result) = run_capture(&command).await.unwrap();

    assert_eq!(file_paths, vec!["working-directory/file1.txt"]);
    assert_eq!(dir_paths, vec!["working-directory/subdirectory"]);

    // The result carries the original relative names, not the normalized
    // in-root paths.
    assert_eq!(result.output_files.len(), 1);
    assert_eq!(result.output_files[0].path, "file1.txt");
    assert_eq!(result.output_directories.len(), 1);
    assert_eq!(result.output_directories[0].path, "subdirectory");
}

#[tokio::test]
async fn empty_working_directory_adds_no_prefix() {
    let command = command("", &["a.out"], &[]);
    let (file_paths, _, _) = run_capture(&command).await.unwrap();
    assert_eq!(file_paths, vec!["a.out"]);
}

#[tokio::test]
async fn absolute_output_file_is_rejected() {
    let command = command("", &["/a.out"], &[]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn trailing_slash_output_directory_is_rejected() {
    let command = command("", &[], &["subdir/"]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn absolute_output_directory_is_rejected() {
    let command = command("", &[], &["/subdir"]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn empty_output_path_is_rejected() {
    let command = command("", &[""], &[]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn escaping_output_path_is_rejected() {
    let command = command("", &["../escape.txt"], &[]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn escaping_via_working_directory_is_rejected() {
    // The joined path normalizes to one that escapes the root.
    let command = command("wd", &["../../escape.txt"], &[]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn absolute_working_directory_is_rejected() {
    let command = command("/absolute", &["file"], &[]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn escaping_working_directory_is_rejected() {
    let command = command("../elsewhere", &["file"], &[]);
    let err = run_capture(&command).await.expect_err("Want err");
    assert!(matches!(err, cas::ClientError::InvalidArgument(_)), "{err}");
}

#[tokio::test]
async fn missing_outputs_are_omitted_from_the_result() {
    let command = command("", &["present", "missing"], &[]);

    let mut result = remexec::ActionResult::default();
    capture_all_outputs(
        &command,
        &mut result,
        |path| {
            // Only "present" is found; a capture of a path that does not
            // exist returns a default (empty-path) OutputFile.
            let output = if path == "present" {
                remexec::OutputFile {
                    path,
                    ..remexec::OutputFile::default()
                }
            } else {
                remexec::OutputFile::default()
            };
            futures::future::ready(Ok(output)).boxed()
        },
        |_path| futures::future::ready(Ok(remexec::OutputDirectory::default())).boxed(),
    )
    .await
    .unwrap();

    assert_eq!(result.output_files.len(), 1);
    assert_eq!(result.output_files[0].path, "present");
}

#[test]
fn normalize_path_cases() {
    assert_eq!(normalize_path("a/b/c"), "a/b/c");
    assert_eq!(normalize_path("a//b/./c"), "a/b/c");
    assert_eq!(normalize_path("a/b/../c"), "a/c");
    assert_eq!(normalize_path("a/.."), ".");
    assert_eq!(normalize_path(".."), "..");
    assert_eq!(normalize_path("../a"), "../a");
    assert_eq!(normalize_path("a/../../b"), "../b");
    assert_eq!(normalize_path("/a/b"), "/a/b");
    assert_eq!(normalize_path("/.."), "/");
    assert_eq!(normalize_path("."), ".");
    assert_eq!(normalize_path("wd/../file"), "file");
}

#[test]
fn resolve_refuses_symlink_components() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("real")).unwrap();
    std::fs::write(dir.path().join("real/file"), b"x").unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

    // Direct paths resolve.
    let resolved = resolve_in_input_root(dir.path(), Path::new("real/file"))
        .unwrap()
        .unwrap();
    assert_eq!(resolved, dir.path().join("real/file"));

    // Paths through a symlink are refused, even though the target is
    // inside the root.
    resolve_in_input_root(dir.path(), Path::new("link/file")).expect_err("Want err");

    // A symlink as the final component is refused as well.
    resolve_in_input_root(dir.path(), Path::new("link")).expect_err("Want err");
}

#[test]
fn resolve_missing_path_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        resolve_in_input_root(dir.path(), Path::new("no/such/file")).unwrap(),
        None
    );
}

#[test]
fn resolve_file_component_used_as_directory_is_none() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("file"), b"x").unwrap();
    assert_eq!(
        resolve_in_input_root(dir.path(), Path::new("file/inner")).unwrap(),
        None
    );
}

#[test]
fn creates_parent_directories_for_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let command = command(
        "",
        &["deep/nested/out.txt", "top.txt"],
        &["results/artifacts"],
    );

    create_output_parent_directories(&command, dir.path()).unwrap();

    assert!(dir.path().join("deep/nested").is_dir());
    assert!(dir.path().join("results").is_dir());
    // The output directory itself is not pre-created, only its parent.
    assert!(!dir.path().join("results/artifacts").exists());
    // Nor is anything created for a top-level output file.
    assert!(!dir.path().join("top.txt").exists());
}

#[test]
fn chmod_applies_recursively() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
    std::fs::set_permissions(
        dir.path().join("a/b"),
        std::fs::Permissions::from_mode(0o700),
    )
    .unwrap();

    recursively_chmod_directories(dir.path(), 0o755).unwrap();

    let mode = std::fs::metadata(dir.path().join("a/b"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}
