use anyhow::{Context, Result};
use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2,
};
use clap::Parser;
use rand::rngs::OsRng;

/// ironircd password hashing utility
///
/// Generates Argon2id hashes for operator blocks in the ironircd
/// configuration file. By default the password is prompted for without
/// echoing; it can also be piped via stdin.
#[derive(Parser, Debug)]
#[command(
    name = "mkpasswd",
    version,
    about = "Generate Argon2 password hashes for ironircd operator blocks"
)]
struct Cli {
    /// Password to hash (insecure; prefer the interactive prompt)
    #[arg(short, long, conflicts_with = "stdin")]
    password: Option<String>,

    /// Read password from stdin (useful for scripting)
    #[arg(short, long)]
    stdin: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let password = if let Some(pwd) = cli.password {
        eprintln!("Warning: passwords on the command line end up in shell history.\n");
        pwd
    } else if cli.stdin {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read password from stdin")?;
        buffer.trim().to_string()
    } else {
        eprintln!("Enter password: ");
        rpassword::read_password().context("Failed to read password")?
    };

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .context("Failed to hash password")?
        .to_string();

    println!("{}", hash);
    println!();
    println!("Put the hash into an operator block:");
    println!("  [[operators]]");
    println!("  name = \"...\"");
    println!("  password_hash = \"{}\"", hash);

    Ok(())
}
