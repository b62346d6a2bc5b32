// Entity Models
//
// Each entity is a flat record in its own table. The shared repository does
// lookup / validate / save / audit; the entity modules only describe their
// columns, derived fields and rules.

pub mod repository;
pub mod validation;

pub mod budget_authority;
pub mod commitment;
pub mod hap_expenditure;
pub mod hcv_utilization;
pub mod mtw_reserve;
pub mod report;
pub mod style_template;
pub mod user;

pub use budget_authority::BudgetAuthority;
pub use commitment::{Commitment, COMMITMENT_STATUSES};
pub use hap_expenditure::HapExpenditure;
pub use hcv_utilization::{voucher_utilization_rate, HcvUtilization};
pub use mtw_reserve::{MtwReserve, RESERVE_TYPES};
pub use report::Report;
pub use repository::{ListQuery, Record, RecordMeta, RepoError, RepoResult};
pub use style_template::StyleTemplate;
pub use user::{User, USER_ROLES};
pub use validation::FieldError;
