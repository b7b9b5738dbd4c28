//! Built-in tool handlers.
//!
//! Every filesystem path goes through [`PathGuard::resolve`] and every shell
//! command through [`CommandValidator::validate`] before anything happens.
//!
//! [`PathGuard::resolve`]: crate::commands::validator::PathGuard::resolve
//! [`CommandValidator::validate`]: crate::commands::validator::CommandValidator::validate

use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;

use crate::commands::executor::{run_captured, ProcessSpec};
use crate::commands::registry::{
    optional_str, required_nonempty, required_str, ToolContext, ToolHandler,
};
use crate::error::ToolError;
use crate::transport::Params;

const DEFAULT_PUSH_BRANCH: &str = "main";

/// Messages git prints when there is nothing staged to commit.
const NOTHING_TO_COMMIT: &[&str] = &[
    "nothing to commit",
    "nothing added to commit",
    "no changes added to commit",
];

pub fn builtin() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(WriteFile),
        Arc::new(ReadFile),
        Arc::new(RunCommand),
        Arc::new(ListFiles),
        Arc::new(CreateDirectory),
        Arc::new(DeleteFile),
        Arc::new(GitCommit),
        Arc::new(GitPush),
    ]
}

fn output<const N: usize>(entries: [(&str, Value); N]) -> Params {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Debug)]
pub struct WriteFile;

#[async_trait]
impl ToolHandler for WriteFile {
    fn name(&self) -> &'static str {
        "writeFile"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let path = required_nonempty(params, "path")?;
        let content = required_str(params, "content")?;
        let target = ctx.paths.resolve(path)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io("create directory", e))?;
        }
        fs::write(&target, content)
            .await
            .map_err(|e| ToolError::io("write file", e))?;

        Ok(output([
            ("message", json!("File written successfully")),
            ("path", json!(path)),
            ("bytesWritten", json!(content.len())),
        ]))
    }
}

#[derive(Debug)]
pub struct ReadFile;

#[async_trait]
impl ToolHandler for ReadFile {
    fn name(&self) -> &'static str {
        "readFile"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let target = ctx.paths.resolve(required_nonempty(params, "path")?)?;
        let content = fs::read_to_string(&target)
            .await
            .map_err(|e| ToolError::io("read file", e))?;
        Ok(output([("content", json!(content))]))
    }
}

#[derive(Debug)]
pub struct RunCommand;

#[async_trait]
impl ToolHandler for RunCommand {
    fn name(&self) -> &'static str {
        "runCommand"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let command = required_nonempty(params, "command")?;
        ctx.commands.validate(command)?;
        let work_dir = ctx.work_dir(params)?;

        let captured = run_captured(&ProcessSpec::shell(command), &work_dir)
            .await?
            .into_result("command")?;

        Ok(output([
            ("stdout", json!(captured.combined)),
            ("exitCode", json!(captured.status.code())),
        ]))
    }
}

#[derive(Debug)]
pub struct ListFiles;

#[async_trait]
impl ToolHandler for ListFiles {
    fn name(&self) -> &'static str {
        "listFiles"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let target = ctx.paths.resolve(required_nonempty(params, "path")?)?;
        let mut entries = fs::read_dir(&target)
            .await
            .map_err(|e| ToolError::io("read directory", e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::io("read directory", e))?
        {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
        files.sort();

        Ok(output([("files", json!(files))]))
    }
}

#[derive(Debug)]
pub struct CreateDirectory;

#[async_trait]
impl ToolHandler for CreateDirectory {
    fn name(&self) -> &'static str {
        "createDirectory"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let target = ctx.paths.resolve(required_nonempty(params, "path")?)?;
        fs::create_dir_all(&target)
            .await
            .map_err(|e| ToolError::io("create directory", e))?;
        Ok(output([("message", json!("Directory created successfully"))]))
    }
}

#[derive(Debug)]
pub struct DeleteFile;

#[async_trait]
impl ToolHandler for DeleteFile {
    fn name(&self) -> &'static str {
        "deleteFile"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let target = ctx.paths.resolve(required_nonempty(params, "path")?)?;
        ctx.paths.check_deletable(&target)?;

        // Symlinks are removed, never followed.
        let existed = match fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&target)
                    .await
                    .map_err(|e| ToolError::io("delete", e))?;
                true
            }
            Ok(_) => {
                fs::remove_file(&target)
                    .await
                    .map_err(|e| ToolError::io("delete", e))?;
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(ToolError::io("delete", e)),
        };

        Ok(output([
            ("message", json!("File deleted successfully")),
            ("existed", json!(existed)),
        ]))
    }
}

#[derive(Debug)]
pub struct GitCommit;

#[async_trait]
impl ToolHandler for GitCommit {
    fn name(&self) -> &'static str {
        "gitCommit"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let message = required_str(params, "message")?;
        let work_dir = ctx.work_dir(params)?;

        run_captured(&ProcessSpec::git(&["add", "."]), &work_dir)
            .await?
            .into_result("git add")?;

        let commit = run_captured(&ProcessSpec::git(&["commit", "-m", message]), &work_dir).await?;
        if commit.success() {
            return Ok(output([
                ("message", json!("Git commit successful")),
                ("committed", json!(true)),
                ("output", json!(commit.combined)),
            ]));
        }
        if NOTHING_TO_COMMIT.iter().any(|m| commit.combined.contains(m)) {
            return Ok(output([
                ("message", json!("Nothing to commit")),
                ("committed", json!(false)),
                ("output", json!(commit.combined)),
            ]));
        }
        Err(ToolError::CommandFailed {
            program: "git commit".to_string(),
            status: commit.status.to_string(),
            output: commit.combined,
        })
    }
}

#[derive(Debug)]
pub struct GitPush;

#[async_trait]
impl ToolHandler for GitPush {
    fn name(&self) -> &'static str {
        "gitPush"
    }

    async fn execute(&self, ctx: &ToolContext, params: &Params) -> Result<Params, ToolError> {
        let work_dir = ctx.work_dir(params)?;
        let branch = optional_str(params, "branch")?.unwrap_or(DEFAULT_PUSH_BRANCH);
        // A leading dash would be parsed as a git option.
        if branch.starts_with('-') {
            return Err(ToolError::MissingParameter("branch"));
        }

        let pushed = run_captured(&ProcessSpec::git(&["push", "origin", branch]), &work_dir)
            .await?
            .into_result("git push")?;

        Ok(output([
            ("message", json!("Git push successful")),
            ("branch", json!(branch)),
            ("output", json!(pushed.combined)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::validator::PathGuard;
    use crate::error::ValidationError;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ToolContext) {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap().with_home(None);
        (dir, ToolContext::new(guard))
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn git_available() -> bool {
        let found = std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !found {
            eprintln!("git not installed, skipping");
        }
        found
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "agent@example.com"]);
        git(dir, &["config", "user.name", "Agent"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
    }

    #[tokio::test]
    async fn write_creates_parents_and_overwrites() {
        let (dir, ctx) = setup();
        let out = WriteFile
            .execute(&ctx, &params(json!({"path": "out/a.txt", "content": "hi"})))
            .await
            .unwrap();
        assert_eq!(out["bytesWritten"], json!(2));
        assert_eq!(std::fs::read_to_string(dir.path().join("out/a.txt")).unwrap(), "hi");

        WriteFile
            .execute(&ctx, &params(json!({"path": "out/a.txt", "content": ""})))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out/a.txt")).unwrap(), "");
    }

    #[tokio::test]
    async fn write_requires_string_params() {
        let (_dir, ctx) = setup();
        let err = WriteFile
            .execute(&ctx, &params(json!({"path": "a.txt"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing or invalid 'content' parameter");

        let err = WriteFile
            .execute(&ctx, &params(json!({"path": 5, "content": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing or invalid 'path' parameter");
    }

    #[tokio::test]
    async fn read_returns_content_and_reports_missing() {
        let (dir, ctx) = setup();
        std::fs::write(dir.path().join("note.md"), "# hello").unwrap();
        let out = ReadFile
            .execute(&ctx, &params(json!({"path": "note.md"})))
            .await
            .unwrap();
        assert_eq!(out["content"], json!("# hello"));

        let err = ReadFile
            .execute(&ctx, &params(json!({"path": "missing.md"})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to read file"));
    }

    #[tokio::test]
    async fn read_outside_root_is_denied() {
        let (_dir, ctx) = setup();
        let err = ReadFile
            .execute(&ctx, &params(json!({"path": "../etc/passwd"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::Rejected(ValidationError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn list_returns_sorted_names() {
        let (dir, ctx) = setup();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("src/nested.rs"), "").unwrap();

        let out = ListFiles
            .execute(&ctx, &params(json!({"path": "."})))
            .await
            .unwrap();
        assert_eq!(out["files"], json!(["a.txt", "b.txt", "src"]));
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let (dir, ctx) = setup();
        let p = params(json!({"path": "a/b/c"}));
        CreateDirectory.execute(&ctx, &p).await.unwrap();
        CreateDirectory.execute(&ctx, &p).await.unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn delete_removes_files_and_trees() {
        let (dir, ctx) = setup();
        std::fs::create_dir_all(dir.path().join("tree/deep")).unwrap();
        std::fs::write(dir.path().join("tree/deep/f"), "x").unwrap();
        std::fs::write(dir.path().join("single"), "x").unwrap();

        DeleteFile
            .execute(&ctx, &params(json!({"path": "tree"})))
            .await
            .unwrap();
        let out = DeleteFile
            .execute(&ctx, &params(json!({"path": "single"})))
            .await
            .unwrap();
        assert_eq!(out["existed"], json!(true));
        assert!(!dir.path().join("tree").exists());
        assert!(!dir.path().join("single").exists());

        let out = DeleteFile
            .execute(&ctx, &params(json!({"path": "single"})))
            .await
            .unwrap();
        assert_eq!(out["existed"], json!(false));
    }

    #[tokio::test]
    async fn delete_refuses_home_even_when_it_is_the_root() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path())
            .unwrap()
            .with_home(Some(dir.path().to_path_buf()));
        let ctx = ToolContext::new(guard);

        let err = DeleteFile
            .execute(&ctx, &params(json!({"path": "."})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot delete root or home directory");
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn run_command_captures_output() {
        let (_dir, ctx) = setup();
        let out = RunCommand
            .execute(&ctx, &params(json!({"command": "echo hello"})))
            .await
            .unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("hello"));
        assert_eq!(out["exitCode"], json!(0));
    }

    #[tokio::test]
    async fn run_command_honours_work_dir() {
        let (dir, ctx) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let out = RunCommand
            .execute(&ctx, &params(json!({"command": "pwd", "workDir": "sub"})))
            .await
            .unwrap();
        assert!(out["stdout"].as_str().unwrap().trim_end().ends_with("sub"));

        let err = RunCommand
            .execute(&ctx, &params(json!({"command": "pwd", "workDir": "../.."})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access denied"));
    }

    #[tokio::test]
    async fn run_command_failure_includes_output() {
        let (_dir, ctx) = setup();
        let err = RunCommand
            .execute(&ctx, &params(json!({"command": "echo before-failure; exit 2"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("before-failure"));
        assert_eq!(err.captured_output(), Some("before-failure\n"));
    }

    #[tokio::test]
    async fn run_command_blocks_dangerous_commands() {
        let (_dir, ctx) = setup();
        let err = RunCommand
            .execute(&ctx, &params(json!({"command": "sudo rm -rf /tmp/x"})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("dangerous command blocked"));
    }

    #[tokio::test]
    async fn git_commit_commits_then_treats_empty_commit_as_success() {
        if !git_available() {
            return;
        }
        let (dir, ctx) = setup();
        init_repo(dir.path());
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();

        let out = GitCommit
            .execute(&ctx, &params(json!({"message": "initial"})))
            .await
            .unwrap();
        assert_eq!(out["committed"], json!(true));

        let out = GitCommit
            .execute(&ctx, &params(json!({"message": "again"})))
            .await
            .unwrap();
        assert_eq!(out["committed"], json!(false));
        assert_eq!(out["message"], json!("Nothing to commit"));
    }

    #[tokio::test]
    async fn git_commit_outside_repo_fails() {
        if !git_available() {
            return;
        }
        let (_dir, ctx) = setup();
        let err = GitCommit
            .execute(&ctx, &params(json!({"message": "x"})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("git add failed"));
    }

    #[tokio::test]
    async fn git_commit_requires_message() {
        let (_dir, ctx) = setup();
        let err = GitCommit.execute(&ctx, &Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing or invalid 'message' parameter");
    }

    #[tokio::test]
    async fn git_push_without_remote_fails_with_output() {
        if !git_available() {
            return;
        }
        let (dir, ctx) = setup();
        init_repo(dir.path());
        let err = GitPush
            .execute(&ctx, &params(json!({"branch": "main"})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("git push failed"));
        assert!(err.captured_output().is_some());
    }

    #[tokio::test]
    async fn git_push_defaults_to_main() {
        if !git_available() {
            return;
        }
        let (dir, ctx) = setup();
        let remote = TempDir::new().unwrap();
        git(remote.path(), &["init", "-q", "--bare"]);

        init_repo(dir.path());
        git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(dir.path(), &["remote", "add", "origin", remote.path().to_str().unwrap()]);
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        GitCommit
            .execute(&ctx, &params(json!({"message": "initial"})))
            .await
            .unwrap();

        let out = GitPush.execute(&ctx, &Params::new()).await.unwrap();
        assert_eq!(out["branch"], json!("main"));
        git(remote.path(), &["rev-parse", "--verify", "refs/heads/main"]);
    }

    #[tokio::test]
    async fn git_push_rejects_option_like_branch() {
        let (_dir, ctx) = setup();
        let err = GitPush
            .execute(&ctx, &params(json!({"branch": "--force"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing or invalid 'branch' parameter");
    }
}
