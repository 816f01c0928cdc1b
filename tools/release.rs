use std::fs;
use std::io::{self, Write};
use std::process::Command;
use toml_edit::{DocumentMut, Item};

type ReleaseResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Runs a command, failing with `error_msg` if it exits unsuccessfully
fn run(program: &str, args: &[&str], error_msg: &str) -> ReleaseResult<()> {
    println!("Executing: {} {}", program, args.join(" "));
    let status = Command::new(program).args(args).status()?;
    if !status.success() {
        return Err(error_msg.to_string().into());
    }
    Ok(())
}

fn capture(program: &str, args: &[&str]) -> ReleaseResult<Option<String>> {
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
}

fn confirm(message: &str) -> Result<bool, io::Error> {
    print!("{} (y/n): ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn prompt(message: &str) -> Result<String, io::Error> {
    println!("{}", message);
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// The most recent tag, falling back to the root commit when none exist
fn previous_release() -> ReleaseResult<Option<String>> {
    if let Some(tag) = capture("git", &["describe", "--tags", "--abbrev=0"])? {
        return Ok(Some(tag));
    }
    capture("git", &["rev-list", "--max-parents=0", "HEAD"])
}

fn release_notes(previous: Option<&str>) -> ReleaseResult<String> {
    let range = previous.map(|tag| format!("{}..HEAD", tag));
    let mut args = vec!["log", "--pretty=format:- %s"];
    if let Some(range) = range.as_deref() {
        args.push(range);
    }
    Ok(capture("git", &args)?.unwrap_or_default())
}

/// Refuses to release from a tree with uncommitted changes
fn ensure_clean_tree() -> ReleaseResult<()> {
    let status = capture("git", &["status", "--porcelain"])?.unwrap_or_default();
    if !status.is_empty() {
        return Err("Working tree has uncommitted changes".into());
    }
    Ok(())
}

struct Manifest {
    doc: DocumentMut,
}

impl Manifest {
    fn load() -> ReleaseResult<Self> {
        let doc = fs::read_to_string("Cargo.toml")?.parse::<DocumentMut>()?;
        Ok(Self { doc })
    }

    fn field(&self, name: &str) -> ReleaseResult<String> {
        self.doc["package"][name]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("Could not find package.{} in Cargo.toml", name).into())
    }

    fn set_version(&mut self, version: &str) -> ReleaseResult<()> {
        self.doc["package"]["version"] = Item::from(version);
        fs::write("Cargo.toml", self.doc.to_string())?;
        Ok(())
    }
}

fn main() -> ReleaseResult<()> {
    ensure_clean_tree()?;

    let mut manifest = Manifest::load()?;
    let name = manifest.field("name")?;
    let current_version = manifest.field("version")?;
    println!("Releasing {} (current version {})", name, current_version);

    let new_version = prompt("Enter new version:")?;
    if new_version.is_empty() {
        return Err("Version cannot be empty".into());
    }
    if new_version == current_version {
        return Err(format!("{} is already at version {}", name, new_version).into());
    }

    // Observer and bridge tests spawn threads; run everything, features included
    run(
        "cargo",
        &["test", "--all-features"],
        "Tests failed; not releasing",
    )?;

    if !confirm(&format!("Ready to release {} {}?", name, new_version))? {
        println!("Release aborted.");
        return Ok(());
    }

    manifest.set_version(&new_version)?;
    println!("Updated Cargo.toml with new version: {}", new_version);
    run("cargo", &["check"], "Failed to update Cargo.lock")?;

    let previous = previous_release()?;
    println!("Previous release: {}", previous.as_deref().unwrap_or("None"));
    let notes = release_notes(previous.as_deref())?;
    if notes.is_empty() {
        println!("Warning: No commits found since the previous release.");
        if !confirm("Continue with empty release notes?")? {
            println!("Release aborted.");
            return Ok(());
        }
    } else {
        println!("Release notes:\n{}", notes);
    }

    let tag = format!("v{}", new_version);
    let commit_message = format!("Bump version to {}", new_version);
    let tag_message = format!("{} {}", name, new_version);
    run("git", &["add", "Cargo.toml", "Cargo.lock"], "Failed to stage Cargo.toml")?;
    run("git", &["commit", "-m", &commit_message], "Failed to commit version bump")?;
    run("git", &["tag", "-a", &tag, "-m", &tag_message], "Failed to create tag")?;
    run("git", &["push"], "Failed to push commits")?;
    run("git", &["push", "--tags"], "Failed to push tags")?;

    if confirm("Publish to crates.io?")? {
        run("cargo", &["publish"], "Failed to publish to crates.io")?;
    } else {
        println!("Skipping crates.io publishing.");
    }

    if confirm("Create GitHub release?")? {
        run(
            "gh",
            &["release", "create", &tag, "--title", &tag, "--notes", &notes],
            "Failed to create GitHub release",
        )?;
    } else {
        println!("Skipping GitHub release creation.");
    }

    println!("Successfully released {} {}", name, new_version);
    Ok(())
}
