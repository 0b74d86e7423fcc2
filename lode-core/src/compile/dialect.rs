use crate::{Compile, Error, Expr, ExprKind, Result, State, build_standard_compile};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// The dialect-neutral compiler every dialect forks from.
pub fn standard_compile() -> &'static Arc<Compile> {
    static STANDARD: Lazy<Arc<Compile>> = Lazy::new(|| Arc::new(build_standard_compile()));
    &STANDARD
}

/// SQLite: everything standard minus sequences, `?` markers.
pub fn sqlite_compile() -> &'static Arc<Compile> {
    static SQLITE: Lazy<Arc<Compile>> = Lazy::new(|| {
        let mut compile = standard_compile().create_child();
        compile.add_reserved_words(["abort", "autoincrement", "glob", "pragma", "vacuum"]);
        Arc::new(compile)
    });
    &SQLITE
}

/// PostgreSQL: sequences via `nextval`, `%s` markers.
pub fn postgres_compile() -> &'static Arc<Compile> {
    static POSTGRES: Lazy<Arc<Compile>> = Lazy::new(|| {
        let mut compile = standard_compile().create_child();
        compile.add_reserved_words(["analyse", "analyze", "freeze", "ilike", "returning"]);
        compile.when(&[ExprKind::Sequence], compile_sequence_nextval);
        Arc::new(compile)
    });
    &POSTGRES
}

/// MySQL: backtick identifier quoting, `%s` markers.
pub fn mysql_compile() -> &'static Arc<Compile> {
    static MYSQL: Lazy<Arc<Compile>> = Lazy::new(|| {
        let mut compile = standard_compile().create_child();
        compile.add_reserved_words(["databases", "fulltext", "lock", "show", "unsigned"]);
        compile.when(&[ExprKind::Token], compile_token_backtick);
        Arc::new(compile)
    });
    &MYSQL
}

fn compile_sequence_nextval(
    _compile: &Compile,
    _state: &mut State,
    expr: &Expr,
    out: &mut String,
) -> Result<()> {
    let Expr::Sequence(name) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    out.push_str("nextval('");
    out.push_str(name);
    out.push_str("')");
    Ok(())
}

fn compile_token_backtick(
    compile: &Compile,
    _state: &mut State,
    expr: &Expr,
    out: &mut String,
) -> Result<()> {
    let Expr::Token(name) = expr else {
        return Err(Error::compile("handler got the wrong node"));
    };
    if is_plain_word(name) && !compile.is_reserved(name) {
        out.push_str(name);
    } else {
        out.push('`');
        let mut parts = name.split('`');
        if let Some(first) = parts.next() {
            out.push_str(first);
        }
        for part in parts {
            out.push_str("``");
            out.push_str(part);
        }
        out.push('`');
    }
    Ok(())
}

fn is_plain_word(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
