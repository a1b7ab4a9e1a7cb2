use std::fmt;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        DexError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        DexError::with_context($base, format!($fmtstr, $($args)*))
    };
    (kind: $kind:ident, $msg:literal) => {
        DexError::of_kind($crate::dex::error::ErrorKind::$kind, $msg)
    };
    (kind: $kind:ident, $fmtstr:literal, $($args:tt)*) => {
        DexError::of_kind($crate::dex::error::ErrorKind::$kind, &format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        DexError::new(&format!($fmtstr, $($args)*))
    };
}


#[macro_export]
macro_rules! fail {
    (kind: $kind:ident, $msg:literal) => {
        return Err(DexError::of_kind($crate::dex::error::ErrorKind::$kind, $msg))
    };
    (kind: $kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::of_kind($crate::dex::error::ErrorKind::$kind, &format!($fmtstr, $($args)*)))
    };
    ($msg:literal) => {
        return Err(DexError::new($msg))
    };
    (($msg:literal), ($context:literal)) => {
        return Err(DexError::with_context(DexError::new($msg), $context.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)))
    };
    (($fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(DexError::with_context(DexError::new(&format!($fmtstr, $($args)*)), format!($contextfmt, $($contextargs)*)))
    };
}

/// What went wrong, as far as a caller can act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind
{
    /// The bytes being decoded do not form a valid structure.
    Corrupt,
    /// The in-memory model cannot be written as it stands.
    Validation,
    /// An API was used in a way its contract forbids.
    Contract,
    /// A key has no entry in its pool.
    Unresolved,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DexError
{
    kind: ErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        Self::of_kind(ErrorKind::Corrupt, msg)
    }

    pub(crate) fn of_kind(kind: ErrorKind, msg: &str) -> Self
    {
        DexError {
            kind,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> ErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}

/// Attaches a context line to the error of a failed step.
pub(crate) trait Context<T>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, DexError>;
}

impl<T> Context<T> for Result<T, DexError>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, DexError>
    {
        self.map_err(|e| DexError::with_context(e, f()))
    }
}
