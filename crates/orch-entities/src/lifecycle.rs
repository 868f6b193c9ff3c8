use orch_core::ids::ItemType;
use orch_core::status::{EntityStatus, Transition};
use tracing::{debug, warn};

/// Applies a backend observation to `current`, clamping backward moves.
pub fn apply_status(
    current: &mut EntityStatus,
    observed: EntityStatus,
    item_type: ItemType,
    id: Option<&str>,
) -> Transition {
    let transition = current.advance(observed);
    match transition {
        Transition::Applied(next) => {
            debug!(%item_type, id = id.unwrap_or("-"), from = %current, to = %next, "status changed");
            *current = next;
        }
        Transition::Clamped { kept, observed } => {
            warn!(%item_type, id = id.unwrap_or("-"), %kept, %observed, "ignoring backward status report");
        }
        Transition::Unchanged(_) => {}
    }
    transition
}
