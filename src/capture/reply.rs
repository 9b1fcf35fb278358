use std::fmt;

/// An SMTP reply: a three-digit code and one or more text lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        debug_assert!(!lines.is_empty());
        Self { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{} ESMTP backsender capture", hostname))
    }

    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn accepted() -> Self {
        Self::new(250, "Message accepted for delivery")
    }

    pub fn start_data() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn closing() -> Self {
        Self::new(221, "Bye")
    }

    pub fn timeout() -> Self {
        Self::new(421, "Error: timeout exceeded")
    }
}

/// Wire format, CRLF-terminated; continuation lines use `-` after the code
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            write!(f, "{}{}{}\r\n", self.code, sep, line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;

    #[test]
    fn test_single_line() {
        assert_eq!(
            Reply::accepted().to_string(),
            "250 Message accepted for delivery\r\n"
        );
    }

    #[test]
    fn test_multiline() {
        let reply = Reply::multiline(
            250,
            vec!["mx.test".to_string(), "8BITMIME".to_string(), "SMTPUTF8".to_string()],
        );
        assert_eq!(
            reply.to_string(),
            "250-mx.test\r\n250-8BITMIME\r\n250 SMTPUTF8\r\n"
        );
    }
}
