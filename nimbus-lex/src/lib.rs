#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, Lexer};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lex_create_var_form() {
        let tokens = Lexer::new("(val int i (lit 0))").lex().unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LParen,
                TokenKind::KwVal,
                TokenKind::Ident("int".to_string()),
                TokenKind::Ident("i".to_string()),
                TokenKind::LParen,
                TokenKind::KwLit,
                TokenKind::Int(0),
                TokenKind::RParen,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn lex_operator_idents() {
        let tokens = Lexer::new("+ - <= >= == != xor").lex().unwrap();
        let names: Vec<String> = tokens
            .into_iter()
            .filter_map(|t| match t.kind {
                TokenKind::Ident(name) => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["+", "-", "<=", ">=", "==", "!=", "xor"]);
    }

    #[test]
    fn lex_negative_number_is_not_minus_operator() {
        let tokens = Lexer::new("-42 -4.5").lex().unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Int(-42), TokenKind::Float(-4.5)]);
    }

    #[test]
    fn lex_single_quoted_string() {
        let tokens = Lexer::new("(lit 'hello world')").lex().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Str("hello world".to_string()));
    }

    #[test]
    fn lex_size_suffixed_name() {
        let tokens = Lexer::new("(get a.size)").lex().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Ident("a.size".to_string()));
    }

    #[test]
    fn lex_keywords_beat_idents() {
        let tokens = Lexer::new("list_at list_set listy").lex().unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::KwListAt,
                TokenKind::KwListSet,
                TokenKind::Ident("listy".to_string()),
            ]
        );
    }

    #[test]
    fn lex_rejects_unknown_character() {
        let err = Lexer::new("(val int x @)").lex().unwrap_err();
        assert!(err.message.contains("unexpected character"));
    }

    #[test]
    fn lex_spans_cover_source_bytes() {
        let src = "(get abc)";
        let tokens = Lexer::new(src).lex().unwrap();
        let get = &tokens[1];
        assert_eq!(get.span.offset(), 1);
        assert_eq!(get.span.len(), 3);
        let abc = &tokens[2];
        assert_eq!(abc.span.offset(), 5);
        assert_eq!(abc.span.len(), 3);
    }
}
