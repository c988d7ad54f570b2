//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data in the
//! corresponding `*_statuses` table of the `create_dispatch_tables` migration.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Return the lookup-table name.
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            /// Map a database status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// Map a lookup-table name back to the enum.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $label => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Stored node status. `Offline` is only stored before the first
    /// heartbeat and after deregistration; staleness is derived on read.
    NodeStatus {
        Online = 1 => "online",
        Busy = 2 => "busy",
        Offline = 3 => "offline",
    }
}

define_status_enum! {
    /// Run lifecycle status.
    RunStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Done = 3 => "done",
        Failed = 4 => "failed",
        Canceled = 5 => "canceled",
    }
}

/// Non-terminal run statuses (the run still occupies its node).
pub const ACTIVE_RUN_STATUSES: [RunStatus; 2] = [RunStatus::Pending, RunStatus::Running];

impl RunStatus {
    /// Whether no further transition is allowed out of this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed | RunStatus::Canceled)
    }

    /// Whether the state machine permits `self -> next`.
    ///
    /// `Pending -> Running`, and any non-terminal status to any terminal one.
    /// Nothing leaves a terminal status.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => next != RunStatus::Pending,
            RunStatus::Running => next.is_terminal(),
            RunStatus::Done | RunStatus::Failed | RunStatus::Canceled => false,
        }
    }
}

/// Whether a raw status ID denotes a terminal run.
///
/// Unknown IDs are treated as terminal so they are never mutated.
pub fn is_terminal_run_status(status_id: StatusId) -> bool {
    RunStatus::from_id(status_id).map_or(true, RunStatus::is_terminal)
}
