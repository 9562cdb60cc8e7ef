use uuid::Uuid;

use pitchdeck_sync::PitchDraft;

pub const HELP: &str = "\
commands:
  feed [text]                      list pitches, optionally searching
  trending                         list trending pitches
  top                              list pitches by likes
  stats                            totals across your pitches
  founders                         most liked founders
  like <pitch>                     toggle your like on a pitch
  comments <pitch>                 show a pitch's comments
  comment <pitch> <text>           comment on a pitch
  uncomment <pitch> <comment>      delete one of your comments
  pitch <title> | <desc> [| tags]  publish a pitch (tags comma separated)
  messages <user>                  show your conversation with a user
  dm <user> <text>                 send a direct message
  ask <text>                       ask the assistant
  clear                            reset the assistant conversation
  quit";

#[derive(Debug)]
pub enum Command {
    Feed { search: Option<String> },
    Trending,
    Top,
    Stats,
    Founders,
    Like(Uuid),
    Comments(Uuid),
    Comment { pitch_id: Uuid, text: String },
    Uncomment { pitch_id: Uuid, comment_id: Uuid },
    Publish(PitchDraft),
    Messages(Uuid),
    DirectMessage { peer: Uuid, text: String },
    Ask(String),
    Clear,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match word {
            "feed" => Command::Feed {
                search: (!rest.is_empty()).then(|| rest.to_string()),
            },
            "trending" => Command::Trending,
            "top" => Command::Top,
            "stats" => Command::Stats,
            "founders" => Command::Founders,
            "like" => Command::Like(id(rest)?),
            "comments" => Command::Comments(id(rest)?),
            "comment" => {
                let (pitch, text) = split_id(rest)?;
                Command::Comment {
                    pitch_id: pitch,
                    text: text.to_string(),
                }
            }
            "uncomment" => {
                let (pitch, comment) = split_id(rest)?;
                Command::Uncomment {
                    pitch_id: pitch,
                    comment_id: id(comment)?,
                }
            }
            "pitch" => Command::Publish(draft(rest)?),
            "messages" => Command::Messages(id(rest)?),
            "dm" => {
                let (peer, text) = split_id(rest)?;
                Command::DirectMessage {
                    peer,
                    text: text.to_string(),
                }
            }
            "ask" => Command::Ask(rest.to_string()),
            "clear" => Command::Clear,
            "help" | "" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{}'", other)),
        };
        Ok(command)
    }
}

fn id(text: &str) -> Result<Uuid, String> {
    Uuid::parse_str(text.trim()).map_err(|_| format!("'{}' is not an id", text.trim()))
}

fn split_id(text: &str) -> Result<(Uuid, &str), String> {
    let (head, tail) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    Ok((id(head)?, tail.trim()))
}

fn draft(text: &str) -> Result<PitchDraft, String> {
    let mut parts = text.split('|').map(str::trim);
    let title = parts.next().unwrap_or_default();
    let description = parts.next().unwrap_or_default();
    let mut draft = PitchDraft::new(title, description);

    for tag in parts.next().unwrap_or_default().split(',').map(str::trim) {
        if tag.is_empty() {
            continue;
        }
        draft.add_tag(tag).map_err(|e| format!("tag '{}': {}", tag, e))?;
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_text() {
        let pitch = Uuid::new_v4();
        match Command::parse(&format!("comment {}  great idea ", pitch)).unwrap() {
            Command::Comment { pitch_id, text } => {
                assert_eq!(pitch_id, pitch);
                assert_eq!(text, "great idea");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Command::parse("like not-an-id").is_err());
        assert!(Command::parse("dance").is_err());
    }

    #[test]
    fn parses_pitch_with_tags() {
        match Command::parse("pitch Solar kiosks | Off-grid charging | energy, africa").unwrap() {
            Command::Publish(draft) => {
                assert_eq!(draft.title, "Solar kiosks");
                assert_eq!(draft.description, "Off-grid charging");
                assert_eq!(draft.tags.iter().collect::<Vec<_>>(), vec!["energy", "africa"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Command::parse("pitch a | b | x, x").is_err());
    }

    #[test]
    fn feed_search_is_optional() {
        assert!(matches!(
            Command::parse("feed").unwrap(),
            Command::Feed { search: None }
        ));
        assert!(matches!(
            Command::parse("feed  fintech ").unwrap(),
            Command::Feed { search: Some(s) } if s == "fintech"
        ));
    }
}
