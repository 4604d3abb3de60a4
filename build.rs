use std::process::Command;

#[allow(unused)]
macro_rules! warn {
    ($($tokens: tt)*) => {
        println!("cargo:warning={}", format!($($tokens)*))
    }
}

/// Set environment varibles for build.rs
/// set_env!(NAME=xfy);
macro_rules! set_env {
    ($($tokens: tt)*) => {
        println!("cargo:rustc-env={}", format!($($tokens)*))
    };
}

fn main() {
    rustc_info();
}

fn rustc_info() {
    let compiler = Command::new("rustc")
        .args(["-vV"])
        .output()
        .ok()
        .and_then(|output| {
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "rustc unknown".to_string());

    set_env!("EMU_COMPILER={}", compiler);
}
