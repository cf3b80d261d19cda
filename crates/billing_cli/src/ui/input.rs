/// One line typed at the `browse` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseCommand {
    Page(i64),
    Search(String),
    Sort(String),
    Limit(u32),
    Refresh,
    Help,
    Quit,
}

pub const HELP: &str = "\
  n | next          next page
  p | prev          previous page
  /text             search (just `/` clears)
  s | sort <field>  sort by field, again to reverse
  l | limit <n>     page size
  r | refresh       reload
  q | quit";

pub fn parse(line: &str) -> Result<Option<BrowseCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(text) = line.strip_prefix('/') {
        return Ok(Some(BrowseCommand::Search(text.trim().to_string())));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word.to_ascii_lowercase().as_str() {
        "n" | "next" => BrowseCommand::Page(1),
        "p" | "prev" => BrowseCommand::Page(-1),
        "r" | "refresh" => BrowseCommand::Refresh,
        "q" | "quit" | "exit" => BrowseCommand::Quit,
        "h" | "help" | "?" => BrowseCommand::Help,
        "s" | "sort" => {
            if rest.is_empty() {
                return Err("sort needs a field name".to_string());
            }
            BrowseCommand::Sort(rest.to_string())
        }
        "l" | "limit" => match rest.parse::<u32>() {
            Ok(limit) if limit > 0 => BrowseCommand::Limit(limit),
            _ => return Err(format!("limit needs a positive number, got {rest:?}")),
        },
        other => return Err(format!("unknown command {other:?}; type h for help")),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_navigation() {
        assert_eq!(parse("n"), Ok(Some(BrowseCommand::Page(1))));
        assert_eq!(parse(" prev "), Ok(Some(BrowseCommand::Page(-1))));
        assert_eq!(parse(""), Ok(None));
        assert_eq!(parse("Q"), Ok(Some(BrowseCommand::Quit)));
    }

    #[test]
    fn parses_search_and_clear() {
        assert_eq!(
            parse("/Room 12"),
            Ok(Some(BrowseCommand::Search("Room 12".to_string())))
        );
        assert_eq!(parse("/"), Ok(Some(BrowseCommand::Search(String::new()))));
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(
            parse("sort total_debt"),
            Ok(Some(BrowseCommand::Sort("total_debt".to_string())))
        );
        assert_eq!(parse("l 50"), Ok(Some(BrowseCommand::Limit(50))));
        assert!(parse("l 0").is_err());
        assert!(parse("sort").is_err());
        assert!(parse("jump 3").is_err());
    }
}
