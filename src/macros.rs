macro_rules! malformed {
    ($s:expr) => {
        $crate::types::Error::MalformedInput($s.into())
    };
    ($fmt:expr, $($args:tt)*) => {
        $crate::types::Error::MalformedInput(format!($fmt, $($args)*).into())
    }
}

macro_rules! unexpected_eof {
    () => {
        $crate::types::Error::MalformedInput("unexpected end of file".into())
    };
    ($s:expr) => {
        $crate::types::Error::MalformedInput(
            format!("unexpected end of file {}", $s).into()
        )
    };
    ($fmt:expr, $($args:tt)*) => {
        $crate::types::Error::MalformedInput(
            format!(concat!("unexpected end of file ", $fmt), $($args)*).into()
        )
    }
}

macro_rules! try_if_eof {
    ($e:expr, $s:expr) => {
        $e.ok_or_else(|| unexpected_eof!($s))?
    };
    ($e:expr, $fmt:expr, $($args:tt)*) => {
        $e.ok_or_else(|| unexpected_eof!($fmt, $($args)*))?
    }
}
