use std::{fs, process::Command, time::SystemTime};

fn main() {
  let now = SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0);
  println!("cargo:rustc-env=BUILD_TIME={}", now);

  println!("cargo:rerun-if-changed=.git/HEAD");

  let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]).or_else(branch_from_head);
  let commit = git(&["rev-parse", "--short", "HEAD"]);

  println!(
    "cargo:rustc-env=GIT_BRANCH={}",
    branch.as_deref().unwrap_or("unknown")
  );
  println!(
    "cargo:rustc-env=GIT_COMMIT={}",
    commit.as_deref().unwrap_or("unknown")
  );
}

fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
  (!value.is_empty()).then_some(value)
}

// Works when the git binary is missing but the checkout is present.
fn branch_from_head() -> Option<String> {
  let head = fs::read_to_string(".git/HEAD").ok()?;
  let reference = head.strip_prefix("ref: ")?.trim();
  reference.rsplit('/').next().map(str::to_string)
}
