//! Command-line argument definitions.

use clap::Parser;

/// Run or inspect compiled Tern modules.
#[derive(Debug, Parser)]
#[command(name = "tern", version, about = "Tern bytecode runtime")]
pub struct Cli {
    /// Compiled module to execute (`.tbc`).
    pub file: String,

    /// Print the module listing instead of executing it.
    #[arg(long)]
    pub disassemble: bool,

    /// Emit diagnostics as JSON on stderr.
    #[arg(long)]
    pub json: bool,

    /// Heap budget in 1 MiB pages.
    #[arg(long, default_value_t = 2048)]
    pub page_limit: u32,

    /// Disable file imports.
    #[arg(long)]
    pub no_import_files: bool,

    /// Byte cap on imported files.
    #[arg(long, default_value_t = 5 * 1024 * 1024)]
    pub max_import_size: u32,
}

impl Cli {
    /// Translate the flags into VM options.
    pub fn vm_options(&self) -> interpreter::VmOptions {
        interpreter::VmOptions {
            import_files: !self.no_import_files,
            repl: false,
            max_import_size: self.max_import_size,
            page_limit: self.page_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["tern", "demo.tbc"]);
        assert_eq!(cli.file, "demo.tbc");
        assert!(!cli.disassemble);
        assert!(!cli.json);
        let options = cli.vm_options();
        assert!(options.import_files);
        assert_eq!(options.page_limit, 2048);
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "tern",
            "demo.tbc",
            "--disassemble",
            "--no-import-files",
            "--page-limit",
            "8",
        ]);
        assert!(cli.disassemble);
        let options = cli.vm_options();
        assert!(!options.import_files);
        assert_eq!(options.page_limit, 8);
    }
}
