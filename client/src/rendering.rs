use log::info;
use shared::{InstanceState, PlayerId, SessionStore, TableId};
use std::collections::HashMap;

/// One line describing a table: its mode, every goal's remaining score and
/// who stands on it.
pub fn render_table(table_id: TableId, instance: &InstanceState, me: Option<PlayerId>) -> String {
    let goals: Vec<String> = (0..instance.slot_count())
        .map(|slot| {
            let score = instance.score(slot).unwrap_or(0);
            match instance.occupant(slot) {
                Some(player) if Some(player) == me => format!("{}: {} (you)", slot, score),
                Some(player) => format!("{}: {} ({})", slot, score, player),
                None => format!("{}: {} (open)", slot, score),
            }
        })
        .collect();

    let ball = match instance.ball {
        Some(ball) => format!("ball {}", ball),
        None => "no ball".to_string(),
    };

    format!(
        "table {} [{}] {} | {}",
        table_id,
        instance.mode,
        goals.join(" | "),
        ball
    )
}

/// Logs a table's line whenever it changes
#[derive(Debug, Default)]
pub struct Scoreboard {
    shown: HashMap<TableId, String>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines that changed since the last call
    pub fn update(&mut self, store: &SessionStore, me: Option<PlayerId>) -> Vec<String> {
        let tables = store.tables();
        self.shown.retain(|table, _| tables.contains(table));

        let mut changed = Vec::new();
        for table_id in tables {
            let Some(instance) = store.instance(table_id) else {
                continue;
            };
            let line = render_table(table_id, instance, me);
            if self.shown.get(&table_id) != Some(&line) {
                info!("{}", line);
                self.shown.insert(table_id, line.clone());
                changed.push(line);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{EntityId, Mode, TableEvent};

    const TABLE: EntityId = EntityId(3);

    fn store() -> SessionStore {
        let mut store = SessionStore::new();
        store.apply(&TableEvent::StartGame {
            table_id: TABLE,
            slots: 2,
            max_damage: 9,
        });
        store
    }

    #[test]
    fn test_render_table() {
        let mut store = store();
        store.apply(&TableEvent::PlayerChange {
            table_id: TABLE,
            slot: 0,
            player: Some(PlayerId(1)),
        });
        store.apply(&TableEvent::PlayerChange {
            table_id: TABLE,
            slot: 1,
            player: Some(PlayerId(2)),
        });
        store.apply(&TableEvent::GoalDamage {
            table_id: TABLE,
            slot: 1,
            damage: 4,
        });

        let line = render_table(TABLE, store.instance(TABLE).unwrap(), Some(PlayerId(2)));
        assert_eq!(
            line,
            "table #3 [stopped] 0: 9 (player 1) | 1: 5 (you) | no ball"
        );
    }

    #[test]
    fn test_scoreboard_reports_changes_only() {
        let mut store = store();
        let mut scoreboard = Scoreboard::new();

        assert_eq!(scoreboard.update(&store, None).len(), 1);
        assert!(scoreboard.update(&store, None).is_empty());

        store.apply(&TableEvent::mode_change(TABLE, Mode::Starting));
        let changed = scoreboard.update(&store, None);
        assert_eq!(changed.len(), 1);
        assert!(changed[0].contains("[starting]"));
    }

    #[test]
    fn test_ended_table_is_forgotten() {
        let mut store = store();
        let mut scoreboard = Scoreboard::new();
        scoreboard.update(&store, None);

        store.apply(&TableEvent::EndGame { table_id: TABLE });
        assert!(scoreboard.update(&store, None).is_empty());

        store.apply(&TableEvent::StartGame {
            table_id: TABLE,
            slots: 2,
            max_damage: 9,
        });
        assert_eq!(scoreboard.update(&store, None).len(), 1);
    }
}
