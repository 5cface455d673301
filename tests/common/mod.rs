#![allow(dead_code)]

use std::ffi::OsStr;
use std::fs;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use git2::build::RepoBuilder;
use git2::{IndexAddOption, Oid, Repository, RepositoryInitOptions};

pub fn generate_path_to_repo<S>(repo_name: S) -> PathBuf
where
    S: Into<String>,
{
    let repo_name: String = repo_name.into();
    let test_fixture_path = Path::new("./test_sandbox/");
    let path_to_repo = test_fixture_path.join(repo_name);
    assert!(path_to_repo.is_relative());
    path_to_repo
}

pub fn generate_path_to_bare_repo<S>(repo_name: S) -> PathBuf
where
    S: Into<String>,
{
    let repo_name: String = repo_name.into();
    generate_path_to_repo(format!("bare_{}.git", repo_name))
}

/// Absolute form of a sandbox path; the path must already exist.
pub fn absolute<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_relative() {
        path.canonicalize().unwrap()
    } else {
        path.to_path_buf()
    }
}

fn init_options(bare: bool) -> RepositoryInitOptions {
    let mut options = RepositoryInitOptions::new();
    options.bare(bare).initial_head("main");
    options
}

fn set_identity(repo: &Repository) {
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "name").unwrap();
    config.set_str("user.email", "email").unwrap();
}

pub fn setup_git_repo<S>(repo_name: S) -> Repository
where
    S: Into<String>,
{
    let path_to_repo = generate_path_to_repo(repo_name);

    fs::remove_dir_all(&path_to_repo).ok();
    fs::create_dir_all(&path_to_repo).unwrap();

    let repo = match Repository::init_opts(path_to_repo, &init_options(false)) {
        Ok(repo) => repo,
        Err(err) => panic!("failed to init repo: {}", err),
    };

    set_identity(&repo);

    repo
}

pub fn setup_git_bare_repo<S>(repo_name: S) -> Repository
where
    S: Into<String>,
{
    let path_to_bare_repo = generate_path_to_bare_repo(repo_name);

    fs::remove_dir_all(&path_to_bare_repo).ok();
    fs::create_dir_all(&path_to_bare_repo).unwrap();

    match Repository::init_opts(path_to_bare_repo, &init_options(true)) {
        Ok(repo) => repo,
        Err(err) => panic!("failed to init bare repo: {}", err),
    }
}

pub fn teardown_git_repo<S>(repo_name: S)
where
    S: Into<String>,
{
    let path_to_repo = generate_path_to_repo(repo_name);
    fs::remove_dir_all(&path_to_repo).ok();
}

pub fn teardown_git_bare_repo<S>(repo_name: S)
where
    S: Into<String>,
{
    let path_to_repo = generate_path_to_bare_repo(repo_name);
    fs::remove_dir_all(&path_to_repo).ok();
}

pub fn stage_everything(repo: &Repository) -> Oid {
    let mut index = repo.index().expect("cannot get the Index file");
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();

    let mut index = repo.index().unwrap();
    // root_tree_oid
    index.write_tree().unwrap()
}

pub fn create_first_commit(repo: &Repository, root_tree_oid: Oid, message: &str) {
    let tree = repo.find_tree(root_tree_oid).unwrap();

    let author = &repo.signature().unwrap();
    let committer = &author;

    repo.commit(Some("HEAD"), author, committer, message, &tree, &[])
        .unwrap();
}

pub fn create_commit(repo: &Repository, root_tree_oid: Oid, message: &str) {
    let tree = repo.find_tree(root_tree_oid).unwrap();
    let head_id = repo.refname_to_id("HEAD").unwrap();
    let parent = repo.find_commit(head_id).unwrap();

    let author = &repo.signature().unwrap();
    let committer = &author;

    repo.commit(Some("HEAD"), author, committer, message, &tree, &[&parent])
        .unwrap();
}

pub fn first_commit_all(repo: &Repository, message: &str) {
    // HEAD should not resolve to anything prior to creating the first commit
    assert!(repo.head().is_err());

    // stage all changes - git add -A *
    let root_tree_oid = stage_everything(repo);

    create_first_commit(repo, root_tree_oid, message);
}

pub fn commit_all(repo: &Repository, message: &str) {
    // stage all changes - git add -A *
    let root_tree_oid = stage_everything(repo);

    create_commit(repo, root_tree_oid, message);
}

pub fn head_oid(repo: &Repository) -> Oid {
    repo.head().unwrap().target().unwrap()
}

pub fn get_current_branch_name(repo: &Repository) -> String {
    let head = repo.head().unwrap();
    head.shorthand().unwrap().to_string()
}

pub fn create_new_file(path_to_repo: &Path, file_name: &str, file_contents: &str) {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path_to_repo.join(file_name))
        .unwrap();

    writeln!(file, "{}", file_contents).unwrap();
}

pub fn append_file(path_to_repo: &Path, file_name: &str, file_contents: &str) {
    let mut file = OpenOptions::new()
        .write(true)
        .append(true)
        .open(path_to_repo.join(file_name))
        .unwrap();

    writeln!(file, "{}", file_contents).unwrap();
}

pub fn overwrite_file(path_to_repo: &Path, file_name: &str, file_contents: &str) {
    fs::write(path_to_repo.join(file_name), format!("{}\n", file_contents)).unwrap();
}

pub fn add_remote(repo: &Repository, remote_name: &str, url: &Path) {
    repo.remote(remote_name, url.to_str().unwrap()).unwrap();
}

pub fn push_branch(repo: &Repository, remote_name: &str, branch_name: &str) {
    let mut remote = repo.find_remote(remote_name).unwrap();
    let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch_name);
    remote.push(&[refspec.as_str()], None).unwrap();
}

pub fn clone_repo(url: &Path, path: &Path, branch_name: &str) -> Repository {
    fs::remove_dir_all(path).ok();
    let repo = RepoBuilder::new()
        .branch(branch_name)
        .clone(url.to_str().unwrap(), path)
        .unwrap();
    set_identity(&repo);
    repo
}

/// A bare "remote" plus an author working copy that pushes to it.
///
/// The working copy under test lives at `local_path` and is created by the
/// test itself (usually through `GitSource::ensure_local`).
pub struct RemoteFixture {
    pub name: String,
    pub author: Repository,
    pub author_path: PathBuf,
    pub bare_path: PathBuf,
    pub local_path: PathBuf,
}

impl RemoteFixture {
    pub fn new(name: &str) -> Self {
        let author_name = format!("{}_author", name);
        let local_name = format!("{}_local", name);

        let author = setup_git_repo(author_name.as_str());
        setup_git_bare_repo(name);
        teardown_git_repo(local_name.as_str());

        let author_path = generate_path_to_repo(author_name);
        let bare_path = absolute(generate_path_to_bare_repo(name));
        let local_path = generate_path_to_repo(local_name);

        add_remote(&author, "origin", &bare_path);

        create_new_file(&author_path, "hello_world.txt", "Hello, world!");
        first_commit_all(&author, "first commit");
        push_branch(&author, "origin", "main");

        RemoteFixture {
            name: name.to_string(),
            author,
            author_path,
            bare_path,
            local_path,
        }
    }

    pub fn url(&self) -> String {
        self.bare_path.to_str().unwrap().to_string()
    }

    /// Writes `file_name` in the author copy, commits and pushes it.
    pub fn push_change(&self, file_name: &str, file_contents: &str, message: &str) -> Oid {
        overwrite_file(&self.author_path, file_name, file_contents);
        commit_all(&self.author, message);
        push_branch(&self.author, "origin", "main");
        head_oid(&self.author)
    }

    pub fn teardown(&self) {
        teardown_git_repo(format!("{}_author", self.name));
        teardown_git_repo(format!("{}_local", self.name));
        teardown_git_repo(format!("{}_scripts", self.name));
        teardown_git_bare_repo(self.name.as_str());
    }
}

/// Creates a directory next to the repositories for scripts and logs that
/// must not live inside the working copy.
pub fn setup_scripts_dir(name: &str) -> PathBuf {
    let path = generate_path_to_repo(format!("{}_scripts", name));
    fs::remove_dir_all(&path).ok();
    fs::create_dir_all(&path).unwrap();
    absolute(path)
}

pub fn write_script(dir: &Path, file_name: &str, body: &str) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

pub fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(|line| line.to_string()).collect(),
        Err(_) => vec![],
    }
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

pub fn run_test_bin<I, T, P: AsRef<Path>>(current_dir: P, arguments: I) -> Output
where
    I: IntoIterator<Item = T>,
    T: AsRef<OsStr>,
{
    let current_dir_buf = absolute(current_dir);

    assert_cmd::Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .expect("Failed to get autopull")
        .current_dir(current_dir_buf)
        .args(arguments)
        .timeout(Duration::from_secs(60))
        .output()
        .expect("Failed to run autopull")
}

/// Starts the binary without waiting for it, for tests that signal it.
pub fn spawn_test_bin<I, T, P: AsRef<Path>>(current_dir: P, arguments: I) -> Child
where
    I: IntoIterator<Item = T>,
    T: AsRef<OsStr>,
{
    Command::new(assert_cmd::cargo::cargo_bin(env!("CARGO_PKG_NAME")))
        .current_dir(absolute(current_dir))
        .args(arguments)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start autopull")
}

/// Waits for `child` to exit, killing it if it outlives `timeout`.
pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let mut status = None;
    wait_until(timeout, || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    match status {
        Some(status) => status,
        None => {
            child.kill().ok();
            panic!("autopull did not exit within {:?}", timeout);
        }
    }
}

pub fn run_test_bin_expect_err<I, T, P: AsRef<Path>>(current_dir: P, arguments: I) -> Output
where
    I: IntoIterator<Item = T>,
    T: AsRef<OsStr>,
{
    let output = run_test_bin(current_dir, arguments);

    if output.status.success() {
        display_outputs(&output);
    }

    assert!(!output.status.success(), "expect err");

    output
}

pub fn run_test_bin_expect_ok<I, T, P: AsRef<Path>>(current_dir: P, arguments: I) -> Output
where
    I: IntoIterator<Item = T>,
    T: AsRef<OsStr>,
{
    let output = run_test_bin(current_dir, arguments);

    if !output.status.success() {
        display_outputs(&output);
    }

    assert!(output.status.success());

    output
}

pub fn display_outputs(output: &Output) {
    io::stdout().write_all(&output.stdout).unwrap();
    io::stderr().write_all(&output.stderr).unwrap();
}
