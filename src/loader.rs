use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::SharedErrorHub;
use crate::native::NativeRegistry;
use crate::prelude::*;

/// Core classes and natives every program starts with.
pub const PREAMBLE: &str = include_str!("stdlib/Stdlib.simi");
pub const PREAMBLE_FILE: &str = "Stdlib.simi";
/// Environment variable naming a replacement preamble file.
pub const PREAMBLE_ENV: &str = "SIMI_PREAMBLE";

const NATIVE_EXTENSIONS: [&str; 4] = ["so", "dylib", "dll", "smod"];

/// The preamble source, honouring `SIMI_PREAMBLE`.
pub fn preamble() -> String {
    match std::env::var_os(PREAMBLE_ENV) {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("cannot read preamble {}: {e}, using the built-in one", Path::new(&path).display());
                PREAMBLE.to_owned()
            }
        },
        None => PREAMBLE.to_owned(),
    }
}

/// Turns source text into one token stream, splicing `import "file"`
/// statements in textually.
pub struct Loader<'a> {
    error_hub: SharedErrorHub,
    natives: &'a mut NativeRegistry,
    seen: HashSet<PathBuf>,
}

impl<'a> Loader<'a> {
    pub fn new(error_hub: SharedErrorHub, natives: &'a mut NativeRegistry) -> Self {
        Self { error_hub, natives, seen: HashSet::new() }
    }

    /// Tokens of `source` preceded by the tokens of every script it imports.
    /// Imports resolve relative to `base`. The result carries no `Eof`.
    pub fn load_source(&mut self, source: &str, file: &str, base: &Path) -> Vec<Token> {
        let mut tokens = Scanner::new(source, file).with_error_reporting(self.error_hub.clone()).scan_tokens();
        tokens.retain(|t| t.token_type != TokenType::Eof);

        let mut own = Vec::with_capacity(tokens.len());
        let mut imported = vec![];
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            let is_import = token.token_type == TokenType::Import
                && iter.peek().map(|t| t.token_type) == Some(TokenType::Str);
            if !is_import {
                own.push(token);
                continue;
            }

            if let Some(path) = iter.next() {
                imported.extend(self.import(&token, &path.lexeme, base));
            }
        }

        tracing::debug!("loaded {file}: {} tokens, {} imported", own.len(), imported.len());

        if let Some(last) = own.last().cloned() {
            own.push(Token::synthetic(TokenType::Newline, "", &last));
        }
        imported.extend(own);
        imported
    }

    /// Reads a script from disk and loads it.
    pub fn load_file(&mut self, path: &Path) -> std::io::Result<Vec<Token>> {
        let source = std::fs::read_to_string(path)?;
        self.seen.insert(canonical(path));

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(self.load_source(&source, &path.display().to_string(), base))
    }

    fn import(&mut self, keyword: &Token, target: &str, base: &Path) -> Vec<Token> {
        let path = base.join(target);
        let native = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| NATIVE_EXTENSIONS.contains(&e))
            .unwrap_or(false);

        if native {
            if let Err(e) = self.natives.load_path(target) {
                self.error_hub.borrow_mut().token_error(keyword, &e.to_string());
            }
            return vec![];
        }

        if self.seen.contains(&canonical(&path)) {
            tracing::trace!("skipping already imported {}", path.display());
            return vec![];
        }

        match self.load_file(&path) {
            Ok(tokens) => tokens,
            Err(e) => {
                let message = format!("Cannot import '{target}': {e}.");
                self.error_hub.borrow_mut().token_error(keyword, &message);
                vec![]
            }
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// End-of-input marker closing a spliced program.
pub fn eof(tokens: &[Token]) -> Token {
    match tokens.last() {
        Some(last) => Token::synthetic(TokenType::Eof, "", last),
        None => Token::new(TokenType::Eof, "", None, 1),
    }
}
