use super::{ConfigBlob, SystemLayout};
use crate::model::{BoardParams, Endpoint};
use tracing::warn;

const SIZE_WORDS_KEY: &str = "max_fragment_size_words";

fn toy_generator(board: &Endpoint) -> String {
    let (kind, board_id) = match &board.params {
        BoardParams::FragmentReceiver { kind, board_id } => (kind.as_str(), *board_id),
        _ => ("TOY1", 0),
    };
    format!(
        "    generator: ToySimulator
    fragment_type: {kind}
    fragment_id: {index}
    board_id: {board_id}
    starting_fragment_id: {index}
    random_seed: {seed}
    sleep_on_stop_us: 500000",
        index = board.role_index,
        seed = 1000 + board.role_index
    )
}

pub(super) fn board_reader(layout: &SystemLayout, board: &Endpoint) -> String {
    format!(
        "daq: {{
  {SIZE_WORDS_KEY}: {size_words}
  fragment_receiver: {{
    mpi_buffer_count: {buffers}
    mpi_sync_interval: 50
    first_event_builder_rank: {frs}
    event_builder_count: {ebs}

{generator}
  }}
}}",
        size_words = layout.input_buffer_size_words / 8,
        buffers = layout.total_ebs * 8,
        frs = layout.total_frs,
        ebs = layout.total_ebs,
        generator = toy_generator(board),
    )
}

/// Merge per-board documents into one `CompositeDriver` document.
///
/// Prolog sections are hoisted to the top (each distinct prolog once) and the composite
/// fragment size is the largest any child asks for.
pub(super) fn composite(layout: &SystemLayout, children: &[ConfigBlob]) -> String {
    let mut prologs: Vec<String> = Vec::new();
    let mut entries = Vec::with_capacity(children.len());
    let mut size_words = 0u64;

    for child in children {
        let (prolog, body) = split_prolog(child.as_str());
        if let Some(p) = prolog {
            if !prologs.iter().any(|saved| saved == p) {
                prologs.push(p.to_string());
            }
        }
        if let Some(words) = max_size_words(&body) {
            size_words = size_words.max(words);
        }
        entries.push(format!("{{{body}}}"));
    }

    let prolog = if prologs.is_empty() {
        String::new()
    } else {
        let mut s = String::from("BEGIN_PROLOG");
        for p in &prologs {
            s.push('\n');
            s.push_str(p);
        }
        s.push_str("\nEND_PROLOG");
        s
    };

    format!(
        "{prolog}
daq: {{
  {SIZE_WORDS_KEY}: {size_words}
  fragment_receiver: {{
    mpi_buffer_count: {buffers}
    first_event_builder_rank: {frs}
    event_builder_count: {ebs}
    generator: CompositeDriver
    fragment_id: 999
    board_id: 999
    generator_config_list:
    [
      # the format of this list is {{daq:<paramSet>}},{{daq:<paramSet>}},...
      {list}
    ]
  }}
}}",
        buffers = layout.total_ebs * 8,
        frs = layout.total_frs,
        ebs = layout.total_ebs,
        list = entries.join(", "),
    )
}

/// Split a document into its `BEGIN_PROLOG ... END_PROLOG` contents and the remaining text.
fn split_prolog(cfg: &str) -> (Option<&str>, String) {
    const BEGIN: &str = "BEGIN_PROLOG";
    const END: &str = "END_PROLOG";
    let Some(start) = cfg.find(BEGIN) else {
        return (None, cfg.to_string());
    };
    let Some(end) = cfg[start..].rfind(END).map(|i| start + i) else {
        return (None, cfg.to_string());
    };
    let prolog = &cfg[start + BEGIN.len()..end];
    let rest = format!("{}{}", &cfg[..start], &cfg[end + END.len()..]);
    (Some(prolog), rest)
}

fn max_size_words(cfg: &str) -> Option<u64> {
    let at = cfg.find(SIZE_WORDS_KEY)?;
    let rest = cfg[at + SIZE_WORDS_KEY.len()..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse() {
        Ok(words) => Some(words),
        Err(e) => {
            warn!(value = %digits, error = %e, "unparsable {SIZE_WORDS_KEY} in composite child");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, BoardKind, Role};

    fn layout() -> SystemLayout {
        SystemLayout {
            total_frs: 2,
            total_ebs: 3,
            total_ags: 1,
            total_boards: 3,
            input_buffer_size_words: 8000,
        }
    }

    fn board(index: usize, board_id: u32) -> Endpoint {
        Endpoint {
            address: Address::new("h1", 5000),
            role: Role::FragmentReceiver,
            role_index: index,
            params: BoardParams::FragmentReceiver {
                kind: BoardKind::Toy2,
                board_id,
            },
        }
    }

    #[test]
    fn board_reader_embeds_ranks_and_board() {
        let cfg = board_reader(&layout(), &board(1, 42));
        assert!(cfg.contains("max_fragment_size_words: 1000"));
        assert!(cfg.contains("mpi_buffer_count: 24"));
        assert!(cfg.contains("first_event_builder_rank: 2"));
        assert!(cfg.contains("event_builder_count: 3"));
        assert!(cfg.contains("fragment_type: TOY2"));
        assert!(cfg.contains("fragment_id: 1"));
        assert!(cfg.contains("board_id: 42"));
    }

    #[test]
    fn composite_hoists_distinct_prologs_and_takes_largest_size() {
        let a = ConfigBlob(
            "BEGIN_PROLOG\nshared: 1\nEND_PROLOG\ndaq: { max_fragment_size_words: 100 }".into(),
        );
        let b = ConfigBlob(
            "BEGIN_PROLOG\nshared: 1\nEND_PROLOG\ndaq: { max_fragment_size_words: 700 }".into(),
        );
        let c = ConfigBlob("daq: { max_fragment_size_words: 300 }".into());

        let cfg = composite(&layout(), &[a, b, c]);
        assert!(cfg.starts_with("BEGIN_PROLOG\n\nshared: 1\n\nEND_PROLOG"));
        assert_eq!(cfg.matches("shared: 1").count(), 1);
        assert!(cfg.contains("max_fragment_size_words: 700\n"));
        assert!(cfg.contains("generator: CompositeDriver"));
        assert_eq!(cfg.matches("{\ndaq: {").count(), 2);
    }

    #[test]
    fn composite_without_prologs_has_no_prolog_block() {
        let cfg = composite(
            &layout(),
            &[ConfigBlob(board_reader(&layout(), &board(0, 1)))],
        );
        assert!(!cfg.contains("BEGIN_PROLOG"));
        assert!(cfg.contains("max_fragment_size_words: 1000\n  fragment_receiver"));
    }
}
