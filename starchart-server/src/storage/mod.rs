pub mod models;
pub mod schema;

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    Activity, ActivityLog, Goal, Household, InboxItem, NewActivity, NewActivityAssignee,
    NewActivityLog, NewGoal, NewHousehold, NewHouseholdMember, NewInboxItem, NewProfile,
    NewPurchaseLog, NewReward, NewRewardAssignee, NewSession, Profile, ProfileChanges,
    PurchaseLog, Reward, Session,
};
use starchart_shared::auth::ProfileKind;
use starchart_shared::domain::{GoalStatus, HouseholdSeed, LogDetail, LogStatus, PurchaseStatus};
use starchart_shared::policy::LicenseTier;
use tracing::{debug, info, trace};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced record does not exist in the household.
    #[error("not found: {0}")]
    NotFound(String),

    /// The record is not in a state that allows the requested change.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A business rule refused the operation (e.g. not enough stars).
    #[error("{0}")]
    Rejected(String),

    /// A stored value could not be interpreted.
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

/// Rows touched by [`Store::delete_profile_cascade`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub purchase_logs: usize,
    pub activity_logs: usize,
    pub goals: usize,
    pub inbox_items: usize,
    pub sessions_cleared: usize,
    pub activities_unassigned: usize,
    pub rewards_unassigned: usize,
}

/// Aggregated figures for one child profile.
#[derive(Debug, Clone)]
pub struct ChildSummary {
    pub profile: Profile,
    pub completions: i64,
    pub stars_earned: i64,
    pub purchases: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HouseholdUsage {
    pub children: i64,
    pub routines: i64,
    pub open_goals: i64,
}

/// Rewards every new household starts with.
const DEFAULT_REWARDS: &[(&str, i32)] = &[
    ("Extra screen time", 10),
    ("Pick the family movie", 20),
    ("Stay up 30 minutes late", 30),
];

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Runs `f` on a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut *conn)
        })
        .await?
    }

    // Households

    pub async fn seed_households(&self, seeds: &[HouseholdSeed]) -> Result<(), StorageError> {
        use schema::households::dsl as h;

        let seeds_owned = seeds.to_owned();
        self.with_conn(move |conn| {
            for seed in &seeds_owned {
                let expires = seed
                    .license_expires_at
                    .as_deref()
                    .map(parse_rfc3339)
                    .transpose()?;
                conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                    let now = Utc::now().naive_utc();
                    let row = NewHousehold {
                        id: &seed.id,
                        license: seed.license.as_str(),
                        license_expires_at: expires,
                        created_at: now,
                    };
                    diesel::insert_into(h::households)
                        .values(&row)
                        .on_conflict(h::id)
                        .do_update()
                        .set((
                            h::license.eq(row.license),
                            h::license_expires_at.eq(row.license_expires_at),
                        ))
                        .execute(conn)?;
                    for member in &seed.members {
                        add_member(conn, &seed.id, member)?;
                    }
                    if let Some(first) = seed.members.first() {
                        bootstrap_household(conn, &seed.id, first)?;
                    }
                    Ok(())
                })?;
                debug!(household_id = %seed.id, members = seed.members.len(), "seeded household");
            }
            Ok(())
        })
        .await
    }

    pub async fn get_household(&self, household: &str) -> Result<Option<Household>, StorageError> {
        use schema::households::dsl as h;
        let hid = household.to_string();
        self.with_conn(move |conn| {
            Ok(h::households
                .filter(h::id.eq(&hid))
                .select(Household::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn household_members(&self, household: &str) -> Result<Vec<String>, StorageError> {
        use schema::household_members::dsl as m;
        let hid = household.to_string();
        self.with_conn(move |conn| {
            Ok(m::household_members
                .filter(m::household_id.eq(&hid))
                .order(m::joined_at.asc())
                .select(m::username)
                .load::<String>(conn)?)
        })
        .await
    }

    /// Households the user belongs to, oldest membership first.
    pub async fn memberships(&self, username: &str) -> Result<Vec<String>, StorageError> {
        use schema::household_members::dsl as m;
        let user = username.to_string();
        self.with_conn(move |conn| {
            Ok(m::household_members
                .filter(m::username.eq(&user))
                .order(m::joined_at.asc())
                .select(m::household_id)
                .load::<String>(conn)?)
        })
        .await
    }

    /// Creates a free household owned by `username`, with a parent profile and
    /// the default reward catalog.
    pub async fn create_household_for(&self, username: &str) -> Result<Household, StorageError> {
        use schema::households::dsl as h;
        let user = username.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Household, StorageError> {
                let hid = uuid::Uuid::new_v4().to_string();
                let row = NewHousehold {
                    id: &hid,
                    license: LicenseTier::Free.as_str(),
                    license_expires_at: None,
                    created_at: Utc::now().naive_utc(),
                };
                let household = diesel::insert_into(h::households)
                    .values(&row)
                    .returning(Household::as_returning())
                    .get_result(conn)?;
                add_member(conn, &hid, &user)?;
                bootstrap_household(conn, &hid, &user)?;
                info!(household_id = %hid, username = %user, "created household");
                Ok(household)
            })
        })
        .await
    }

    /// Appends `username` to the household's members. Returns `false` when the
    /// user was already a member.
    pub async fn join_household(
        &self,
        household: &str,
        username: &str,
    ) -> Result<bool, StorageError> {
        use schema::households::dsl as h;
        let hid = household.to_string();
        let user = username.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let exists: i64 = h::households
                    .filter(h::id.eq(&hid))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound(format!("household {hid}")));
                }
                Ok(add_member(conn, &hid, &user)? > 0)
            })
        })
        .await
    }

    pub async fn household_usage(&self, household: &str) -> Result<HouseholdUsage, StorageError> {
        let hid = household.to_string();
        self.with_conn(move |conn| {
            Ok(HouseholdUsage {
                children: count_children(conn, &hid)?,
                routines: count_activities(conn, &hid)?,
                open_goals: count_open_goals(conn, &hid)?,
            })
        })
        .await
    }

    // Profiles

    pub async fn list_profiles(&self, household: &str) -> Result<Vec<Profile>, StorageError> {
        use schema::profiles::dsl as p;
        let hid = household.to_string();
        self.with_conn(move |conn| {
            Ok(p::profiles
                .filter(p::household_id.eq(&hid))
                .order((p::kind.desc(), p::created_at.asc()))
                .select(Profile::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_profile(
        &self,
        household: &str,
        profile: &str,
    ) -> Result<Option<Profile>, StorageError> {
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| find_profile(conn, &hid, &pid)).await
    }

    pub async fn count_child_profiles(&self, household: &str) -> Result<i64, StorageError> {
        let hid = household.to_string();
        self.with_conn(move |conn| count_children(conn, &hid)).await
    }

    pub async fn create_profile(
        &self,
        household: &str,
        kind: ProfileKind,
        display_name: &str,
        avatar: &str,
        theme: &str,
        pin_hash: Option<String>,
    ) -> Result<Profile, StorageError> {
        use schema::profiles::dsl as p;
        if display_name.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "display_name cannot be empty".into(),
            ));
        }
        let hid = household.to_string();
        let name = display_name.trim().to_string();
        let avatar = avatar.to_string();
        let theme = theme.to_string();
        self.with_conn(move |conn| {
            let pid = uuid::Uuid::new_v4().to_string();
            let row = NewProfile {
                id: &pid,
                household_id: &hid,
                kind: kind.as_str(),
                display_name: &name,
                avatar: &avatar,
                theme: &theme,
                stars: 0,
                xp: 0,
                pin_hash: pin_hash.as_deref(),
                created_at: Utc::now().naive_utc(),
            };
            let profile = diesel::insert_into(p::profiles)
                .values(&row)
                .returning(Profile::as_returning())
                .get_result(conn)?;
            debug!(household_id = %hid, profile_id = %pid, kind = %kind, "created profile");
            Ok(profile)
        })
        .await
    }

    pub async fn update_profile(
        &self,
        household: &str,
        profile: &str,
        changes: ProfileChanges,
    ) -> Result<Profile, StorageError> {
        use schema::profiles::dsl as p;
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| {
            let nothing_to_change = changes.display_name.is_none()
                && changes.avatar.is_none()
                && changes.theme.is_none()
                && changes.pin_hash.is_none();
            if !nothing_to_change {
                diesel::update(
                    p::profiles
                        .filter(p::id.eq(&pid))
                        .filter(p::household_id.eq(&hid)),
                )
                .set(&changes)
                .execute(conn)?;
            }
            find_profile(conn, &hid, &pid)?
                .ok_or_else(|| StorageError::NotFound(format!("profile {pid}")))
        })
        .await
    }

    /// Deletes a profile together with everything keyed to it, in one
    /// transaction. Nothing is written when any step fails.
    pub async fn delete_profile_cascade(
        &self,
        household: &str,
        profile: &str,
    ) -> Result<CascadeReport, StorageError> {
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| {
            let report = conn.immediate_transaction(|conn| cascade_delete_profile(conn, &hid, &pid))?;
            info!(household_id = %hid, profile_id = %pid, ?report, "profile deleted");
            Ok(report)
        })
        .await
    }

    // Activities

    /// Activities with their assignees; `assigned_to` keeps only those
    /// assigned to that profile.
    pub async fn list_activities(
        &self,
        household: &str,
        assigned_to: Option<&str>,
    ) -> Result<Vec<(Activity, Vec<String>)>, StorageError> {
        use schema::activities::dsl as a;
        let hid = household.to_string();
        let filter = assigned_to.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let rows = a::activities
                .filter(a::household_id.eq(&hid))
                .order((a::name.asc(), a::created_at.asc()))
                .select(Activity::as_select())
                .load(conn)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut assignees = activity_assignee_map(conn, &ids)?;
            Ok(rows
                .into_iter()
                .map(|r| {
                    let list = assignees.remove(&r.id).unwrap_or_default();
                    (r, list)
                })
                .filter(|(_, list)| match &filter {
                    Some(pid) => list.iter().any(|x| x == pid),
                    None => true,
                })
                .collect())
        })
        .await
    }

    pub async fn count_activities(&self, household: &str) -> Result<i64, StorageError> {
        let hid = household.to_string();
        self.with_conn(move |conn| count_activities(conn, &hid)).await
    }

    /// `steps` and `schedule` are the JSON encodings stored verbatim.
    pub async fn create_activity(
        &self,
        household: &str,
        name: &str,
        steps: &str,
        schedule: &str,
        stars: i32,
        profile_ids: &[String],
    ) -> Result<(Activity, Vec<String>), StorageError> {
        use schema::activities::dsl as a;
        if name.trim().is_empty() {
            return Err(StorageError::InvalidInput("name cannot be empty".into()));
        }
        if stars < 0 {
            return Err(StorageError::InvalidInput(
                "stars cannot be negative".into(),
            ));
        }
        let hid = household.to_string();
        let name = name.trim().to_string();
        let steps = steps.to_string();
        let schedule = schedule.to_string();
        let assignees = dedup(profile_ids);
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(Activity, Vec<String>), StorageError> {
                ensure_children(conn, &hid, &assignees)?;
                let aid = uuid::Uuid::new_v4().to_string();
                let row = NewActivity {
                    id: &aid,
                    household_id: &hid,
                    name: &name,
                    steps: &steps,
                    schedule: &schedule,
                    stars,
                    created_at: Utc::now().naive_utc(),
                };
                let activity = diesel::insert_into(a::activities)
                    .values(&row)
                    .returning(Activity::as_returning())
                    .get_result(conn)?;
                replace_activity_assignees(conn, &aid, &assignees)?;
                Ok((activity, assignees))
            })
        })
        .await
    }

    pub async fn set_activity_assignees(
        &self,
        household: &str,
        activity: &str,
        profile_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let hid = household.to_string();
        let aid = activity.to_string();
        let assignees = dedup(profile_ids);
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Vec<String>, StorageError> {
                find_activity(conn, &hid, &aid)?
                    .ok_or_else(|| StorageError::NotFound(format!("activity {aid}")))?;
                ensure_children(conn, &hid, &assignees)?;
                replace_activity_assignees(conn, &aid, &assignees)?;
                Ok(assignees)
            })
        })
        .await
    }

    /// Removes the activity definition. Its logs stay as history.
    pub async fn delete_activity(&self, household: &str, activity: &str) -> Result<bool, StorageError> {
        use schema::activities::dsl as a;
        use schema::activity_assignees::dsl as aa;
        let hid = household.to_string();
        let aid = activity.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let deleted = diesel::delete(
                    a::activities
                        .filter(a::id.eq(&aid))
                        .filter(a::household_id.eq(&hid)),
                )
                .execute(conn)?;
                if deleted == 0 {
                    return Ok(false);
                }
                diesel::delete(aa::activity_assignees.filter(aa::activity_id.eq(&aid)))
                    .execute(conn)?;
                Ok(true)
            })
        })
        .await
    }

    /// Records a routine completion for a child and credits the stars it
    /// earned. A partial completion is logged but earns nothing.
    pub async fn complete_activity(
        &self,
        household: &str,
        profile: &str,
        activity: &str,
        steps_completed: Option<u32>,
    ) -> Result<(ActivityLog, Profile), StorageError> {
        use schema::activity_assignees::dsl as aa;
        let hid = household.to_string();
        let pid = profile.to_string();
        let aid = activity.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(ActivityLog, Profile), StorageError> {
                let child = find_child(conn, &hid, &pid)?;
                let act = find_activity(conn, &hid, &aid)?
                    .ok_or_else(|| StorageError::NotFound(format!("activity {aid}")))?;
                let assigned: i64 = aa::activity_assignees
                    .filter(aa::activity_id.eq(&aid))
                    .filter(aa::profile_id.eq(&pid))
                    .count()
                    .get_result(conn)?;
                if assigned == 0 {
                    return Err(StorageError::Rejected(format!(
                        "activity {aid} is not assigned to {}",
                        child.display_name
                    )));
                }
                let steps: Vec<starchart_shared::domain::Step> =
                    serde_json::from_str(&act.steps)
                        .map_err(|e| StorageError::InvalidData(e.to_string()))?;
                let steps_total = steps.len() as u32;
                let done = steps_completed.unwrap_or(steps_total);
                if done > steps_total {
                    return Err(StorageError::InvalidInput(format!(
                        "steps_completed {done} exceeds {steps_total} steps"
                    )));
                }
                let status = if done >= steps_total {
                    LogStatus::Completed
                } else {
                    LogStatus::Partial
                };
                let earned = if status == LogStatus::Completed {
                    act.stars
                } else {
                    0
                };
                let detail = LogDetail::RoutineCompletion {
                    activity_name: act.name.clone(),
                    steps_completed: done,
                    steps_total,
                };
                let log = append_log(conn, &hid, &pid, Some(&aid), status, earned, &detail)?;
                let balance = credit_stars(conn, &pid, earned)?;
                trace!(profile_id = %pid, activity_id = %aid, earned, "activity completed");
                Ok((log, balance))
            })
        })
        .await
    }

    pub async fn list_activity_logs(
        &self,
        household: &str,
        profile: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<ActivityLog>, StorageError> {
        use schema::activity_logs::dsl as al;
        let hid = household.to_string();
        let pid = profile.to_string();
        let (offset, limit) = page_window(page, per_page);
        self.with_conn(move |conn| {
            Ok(al::activity_logs
                .filter(al::household_id.eq(&hid))
                .filter(al::profile_id.eq(&pid))
                .order((al::created_at.desc(), al::id.desc()))
                .offset(offset)
                .limit(limit)
                .select(ActivityLog::as_select())
                .load(conn)?)
        })
        .await
    }

    // Rewards

    /// Rewards with their assignees; `visible_to` keeps those unrestricted or
    /// assigned to that profile.
    pub async fn list_rewards(
        &self,
        household: &str,
        visible_to: Option<&str>,
    ) -> Result<Vec<(Reward, Vec<String>)>, StorageError> {
        use schema::rewards::dsl as r;
        let hid = household.to_string();
        let filter = visible_to.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let rows = r::rewards
                .filter(r::household_id.eq(&hid))
                .order((r::cost.asc(), r::name.asc()))
                .select(Reward::as_select())
                .load(conn)?;
            let ids: Vec<String> = rows.iter().map(|x| x.id.clone()).collect();
            let mut assignees = reward_assignee_map(conn, &ids)?;
            Ok(rows
                .into_iter()
                .map(|x| {
                    let list = assignees.remove(&x.id).unwrap_or_default();
                    (x, list)
                })
                .filter(|(_, list)| match &filter {
                    Some(pid) => list.is_empty() || list.iter().any(|x| x == pid),
                    None => true,
                })
                .collect())
        })
        .await
    }

    pub async fn create_reward(
        &self,
        household: &str,
        name: &str,
        cost: i32,
        profile_ids: &[String],
    ) -> Result<(Reward, Vec<String>), StorageError> {
        if name.trim().is_empty() {
            return Err(StorageError::InvalidInput("name cannot be empty".into()));
        }
        if cost <= 0 {
            return Err(StorageError::InvalidInput("cost must be positive".into()));
        }
        let hid = household.to_string();
        let name = name.trim().to_string();
        let assignees = dedup(profile_ids);
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(Reward, Vec<String>), StorageError> {
                ensure_children(conn, &hid, &assignees)?;
                let reward = insert_reward(conn, &hid, &name, cost)?;
                replace_reward_assignees(conn, &reward.id, &assignees)?;
                Ok((reward, assignees))
            })
        })
        .await
    }

    pub async fn set_reward_assignees(
        &self,
        household: &str,
        reward: &str,
        profile_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let hid = household.to_string();
        let rid = reward.to_string();
        let assignees = dedup(profile_ids);
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Vec<String>, StorageError> {
                find_reward(conn, &hid, &rid)?
                    .ok_or_else(|| StorageError::NotFound(format!("reward {rid}")))?;
                ensure_children(conn, &hid, &assignees)?;
                replace_reward_assignees(conn, &rid, &assignees)?;
                Ok(assignees)
            })
        })
        .await
    }

    /// Removes the reward. Purchase logs keep their snapshot.
    pub async fn delete_reward(&self, household: &str, reward: &str) -> Result<bool, StorageError> {
        use schema::reward_assignees::dsl as ra;
        use schema::rewards::dsl as r;
        let hid = household.to_string();
        let rid = reward.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let deleted = diesel::delete(
                    r::rewards
                        .filter(r::id.eq(&rid))
                        .filter(r::household_id.eq(&hid)),
                )
                .execute(conn)?;
                if deleted == 0 {
                    return Ok(false);
                }
                diesel::delete(ra::reward_assignees.filter(ra::reward_id.eq(&rid)))
                    .execute(conn)?;
                Ok(true)
            })
        })
        .await
    }

    // Purchases

    /// Debits the reward's cost from the child and records a pending purchase
    /// with a snapshot of the reward.
    pub async fn purchase_reward(
        &self,
        household: &str,
        profile: &str,
        reward: &str,
    ) -> Result<PurchaseLog, StorageError> {
        use schema::profiles::dsl as p;
        use schema::purchase_logs::dsl as pl;
        use schema::reward_assignees::dsl as ra;
        let hid = household.to_string();
        let pid = profile.to_string();
        let rid = reward.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<PurchaseLog, StorageError> {
                let child = find_child(conn, &hid, &pid)?;
                let item = find_reward(conn, &hid, &rid)?
                    .ok_or_else(|| StorageError::NotFound(format!("reward {rid}")))?;
                let assigned: Vec<String> = ra::reward_assignees
                    .filter(ra::reward_id.eq(&rid))
                    .select(ra::profile_id)
                    .load(conn)?;
                if !assigned.is_empty() && !assigned.contains(&pid) {
                    return Err(StorageError::Rejected(format!(
                        "{} is not available to {}",
                        item.name, child.display_name
                    )));
                }
                if child.stars < item.cost {
                    return Err(StorageError::Rejected(format!(
                        "{} needs {} stars but only {} are available",
                        item.name, item.cost, child.stars
                    )));
                }
                diesel::update(p::profiles.filter(p::id.eq(&pid)))
                    .set(p::stars.eq(p::stars - item.cost))
                    .execute(conn)?;
                let now = Utc::now().naive_utc();
                let row = NewPurchaseLog {
                    household_id: &hid,
                    profile_id: &pid,
                    reward_id: &item.id,
                    reward_name: &item.name,
                    reward_cost: item.cost,
                    status: PurchaseStatus::Pending.as_str(),
                    created_at: now,
                    updated_at: now,
                };
                Ok(diesel::insert_into(pl::purchase_logs)
                    .values(&row)
                    .returning(PurchaseLog::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    pub async fn list_purchases(
        &self,
        household: &str,
        profile: &str,
    ) -> Result<Vec<PurchaseLog>, StorageError> {
        use schema::purchase_logs::dsl as pl;
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| {
            Ok(pl::purchase_logs
                .filter(pl::household_id.eq(&hid))
                .filter(pl::profile_id.eq(&pid))
                .order((pl::created_at.desc(), pl::id.desc()))
                .select(PurchaseLog::as_select())
                .load(conn)?)
        })
        .await
    }

    /// Moves a purchase to `next`. Rejecting refunds the stars. When
    /// `owner` is given the purchase must belong to that profile.
    pub async fn transition_purchase(
        &self,
        household: &str,
        purchase_id: i32,
        next: PurchaseStatus,
        owner: Option<&str>,
    ) -> Result<PurchaseLog, StorageError> {
        use schema::purchase_logs::dsl as pl;
        let hid = household.to_string();
        let owner = owner.map(|s| s.to_string());
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<PurchaseLog, StorageError> {
                let purchase = pl::purchase_logs
                    .filter(pl::id.eq(purchase_id))
                    .filter(pl::household_id.eq(&hid))
                    .select(PurchaseLog::as_select())
                    .first(conn)
                    .optional()?
                    .filter(|row| owner.as_deref().is_none_or(|o| o == row.profile_id))
                    .ok_or_else(|| StorageError::NotFound(format!("purchase {purchase_id}")))?;
                let current: PurchaseStatus = purchase
                    .status
                    .parse()
                    .map_err(StorageError::InvalidData)?;
                if !current.can_transition_to(next) {
                    return Err(StorageError::Conflict(format!(
                        "purchase {purchase_id} is {current}, cannot become {next}"
                    )));
                }
                if next == PurchaseStatus::Rejected {
                    credit_refund(conn, &purchase.profile_id, purchase.reward_cost)?;
                }
                Ok(diesel::update(pl::purchase_logs.filter(pl::id.eq(purchase_id)))
                    .set((
                        pl::status.eq(next.as_str()),
                        pl::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(PurchaseLog::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    // Inbox

    pub async fn grant_stars(
        &self,
        household: &str,
        profile: &str,
        stars: i32,
        reason: &str,
        granted_by: &str,
    ) -> Result<InboxItem, StorageError> {
        use schema::inbox_items::dsl as ib;
        if stars <= 0 {
            return Err(StorageError::InvalidInput("stars must be positive".into()));
        }
        let hid = household.to_string();
        let pid = profile.to_string();
        let reason = reason.trim().to_string();
        let by = granted_by.to_string();
        self.with_conn(move |conn| {
            find_child(conn, &hid, &pid)?;
            let row = NewInboxItem {
                household_id: &hid,
                profile_id: &pid,
                stars,
                reason: &reason,
                granted_by: &by,
                created_at: Utc::now().naive_utc(),
            };
            Ok(diesel::insert_into(ib::inbox_items)
                .values(&row)
                .returning(InboxItem::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    pub async fn list_inbox(
        &self,
        household: &str,
        profile: &str,
        include_claimed: bool,
    ) -> Result<Vec<InboxItem>, StorageError> {
        use schema::inbox_items::dsl as ib;
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| {
            let mut query = ib::inbox_items
                .filter(ib::household_id.eq(&hid))
                .filter(ib::profile_id.eq(&pid))
                .into_boxed();
            if !include_claimed {
                query = query.filter(ib::claimed_at.is_null());
            }
            Ok(query
                .order((ib::created_at.desc(), ib::id.desc()))
                .select(InboxItem::as_select())
                .load(conn)?)
        })
        .await
    }

    /// Moves a pending grant into the child's balance and logs it as a manual
    /// award.
    pub async fn claim_inbox_item(
        &self,
        household: &str,
        profile: &str,
        item_id: i32,
    ) -> Result<(InboxItem, Profile), StorageError> {
        use schema::inbox_items::dsl as ib;
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(InboxItem, Profile), StorageError> {
                let item = ib::inbox_items
                    .filter(ib::id.eq(item_id))
                    .filter(ib::household_id.eq(&hid))
                    .filter(ib::profile_id.eq(&pid))
                    .select(InboxItem::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("inbox item {item_id}")))?;
                if item.claimed_at.is_some() {
                    return Err(StorageError::Conflict(format!(
                        "inbox item {item_id} was already claimed"
                    )));
                }
                let claimed = diesel::update(ib::inbox_items.filter(ib::id.eq(item_id)))
                    .set(ib::claimed_at.eq(Some(Utc::now().naive_utc())))
                    .returning(InboxItem::as_returning())
                    .get_result(conn)?;
                let detail = LogDetail::ManualAward {
                    reason: item.reason.clone(),
                    granted_by: item.granted_by.clone(),
                    inbox_item_id: item.id,
                };
                append_log(conn, &hid, &pid, None, LogStatus::Completed, item.stars, &detail)?;
                let balance = credit_stars(conn, &pid, item.stars)?;
                Ok((claimed, balance))
            })
        })
        .await
    }

    // Goals

    pub async fn count_open_goals(&self, household: &str) -> Result<i64, StorageError> {
        let hid = household.to_string();
        self.with_conn(move |conn| count_open_goals(conn, &hid)).await
    }

    pub async fn create_goal(
        &self,
        household: &str,
        profile: &str,
        title: &str,
        target_stars: i32,
        status: GoalStatus,
    ) -> Result<Goal, StorageError> {
        use schema::goals::dsl as g;
        if title.trim().is_empty() {
            return Err(StorageError::InvalidInput("title cannot be empty".into()));
        }
        if target_stars <= 0 {
            return Err(StorageError::InvalidInput(
                "target_stars must be positive".into(),
            ));
        }
        let hid = household.to_string();
        let pid = profile.to_string();
        let title = title.trim().to_string();
        self.with_conn(move |conn| {
            find_child(conn, &hid, &pid)?;
            let gid = uuid::Uuid::new_v4().to_string();
            let now = Utc::now().naive_utc();
            let row = NewGoal {
                id: &gid,
                household_id: &hid,
                profile_id: &pid,
                title: &title,
                target_stars,
                progress: 0,
                status: status.as_str(),
                created_at: now,
                updated_at: now,
            };
            Ok(diesel::insert_into(g::goals)
                .values(&row)
                .returning(Goal::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    pub async fn list_goals(&self, household: &str, profile: &str) -> Result<Vec<Goal>, StorageError> {
        use schema::goals::dsl as g;
        let hid = household.to_string();
        let pid = profile.to_string();
        self.with_conn(move |conn| {
            Ok(g::goals
                .filter(g::household_id.eq(&hid))
                .filter(g::profile_id.eq(&pid))
                .order(g::created_at.desc())
                .select(Goal::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn transition_goal(
        &self,
        household: &str,
        goal: &str,
        next: GoalStatus,
    ) -> Result<Goal, StorageError> {
        use schema::goals::dsl as g;
        let hid = household.to_string();
        let gid = goal.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Goal, StorageError> {
                let current = find_goal(conn, &hid, &gid)?;
                let status: GoalStatus = current.status.parse().map_err(StorageError::InvalidData)?;
                if !status.can_transition_to(next) {
                    return Err(StorageError::Conflict(format!(
                        "goal {gid} is {status}, cannot become {next}"
                    )));
                }
                Ok(diesel::update(g::goals.filter(g::id.eq(&gid)))
                    .set((
                        g::status.eq(next.as_str()),
                        g::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(Goal::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    /// Adds progress to an active goal; reaching the target completes it.
    pub async fn record_goal_progress(
        &self,
        household: &str,
        goal: &str,
        stars: i32,
    ) -> Result<Goal, StorageError> {
        use schema::goals::dsl as g;
        if stars <= 0 {
            return Err(StorageError::InvalidInput("stars must be positive".into()));
        }
        let hid = household.to_string();
        let gid = goal.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Goal, StorageError> {
                let current = find_goal(conn, &hid, &gid)?;
                let status: GoalStatus = current.status.parse().map_err(StorageError::InvalidData)?;
                if status != GoalStatus::Active {
                    return Err(StorageError::Conflict(format!(
                        "goal {gid} is {status}, progress needs an active goal"
                    )));
                }
                let progress = current.progress.saturating_add(stars);
                let next = if progress >= current.target_stars {
                    GoalStatus::Completed
                } else {
                    GoalStatus::Active
                };
                let updated = diesel::update(g::goals.filter(g::id.eq(&gid)))
                    .set((
                        g::progress.eq(progress),
                        g::status.eq(next.as_str()),
                        g::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning(Goal::as_returning())
                    .get_result(conn)?;
                let detail = LogDetail::GoalProgress {
                    goal_id: gid.clone(),
                    progress,
                    target: current.target_stars,
                };
                append_log(
                    conn,
                    &hid,
                    &current.profile_id,
                    None,
                    LogStatus::Completed,
                    0,
                    &detail,
                )?;
                Ok(updated)
            })
        })
        .await
    }

    // Analytics

    pub async fn child_summaries(&self, household: &str) -> Result<Vec<ChildSummary>, StorageError> {
        use diesel::dsl::{count_star, sum};
        use schema::activity_logs::dsl as al;
        use schema::profiles::dsl as p;
        use schema::purchase_logs::dsl as pl;
        let hid = household.to_string();
        self.with_conn(move |conn| {
            let children = p::profiles
                .filter(p::household_id.eq(&hid))
                .filter(p::kind.eq(ProfileKind::Child.as_str()))
                .order(p::created_at.asc())
                .select(Profile::as_select())
                .load(conn)?;
            let completions: HashMap<String, i64> = al::activity_logs
                .filter(al::household_id.eq(&hid))
                .filter(al::kind.eq("routine_completion"))
                .filter(al::status.eq(LogStatus::Completed.as_str()))
                .group_by(al::profile_id)
                .select((al::profile_id, count_star()))
                .load::<(String, i64)>(conn)?
                .into_iter()
                .collect();
            let earned: HashMap<String, Option<i64>> = al::activity_logs
                .filter(al::household_id.eq(&hid))
                .group_by(al::profile_id)
                .select((al::profile_id, sum(al::stars_earned)))
                .load::<(String, Option<i64>)>(conn)?
                .into_iter()
                .collect();
            let purchases: HashMap<String, i64> = pl::purchase_logs
                .filter(pl::household_id.eq(&hid))
                .filter(pl::status.ne(PurchaseStatus::Rejected.as_str()))
                .group_by(pl::profile_id)
                .select((pl::profile_id, count_star()))
                .load::<(String, i64)>(conn)?
                .into_iter()
                .collect();
            Ok(children
                .into_iter()
                .map(|profile| ChildSummary {
                    completions: completions.get(&profile.id).copied().unwrap_or(0),
                    stars_earned: earned.get(&profile.id).copied().flatten().unwrap_or(0),
                    purchases: purchases.get(&profile.id).copied().unwrap_or(0),
                    profile,
                })
                .collect())
        })
        .await
    }

    // Session helpers for JWT inactivity windows

    pub async fn create_session(
        &self,
        jti_: &str,
        username_: &str,
        household: &str,
    ) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti_.to_string();
        let u = username_.to_string();
        let hid = household.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let new = NewSession {
                jti: &j,
                username: &u,
                household_id: &hid,
                issued_at: now,
                last_used_at: now,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Session with its active profile, if one is selected and still exists.
    pub async fn get_session(
        &self,
        jti_: &str,
    ) -> Result<Option<(Session, Option<Profile>)>, StorageError> {
        use schema::sessions::dsl as s;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let Some(session) = s::sessions
                .filter(s::jti.eq(&j))
                .select(Session::as_select())
                .first(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let profile = match session.active_profile_id.as_deref() {
                Some(pid) => find_profile(conn, &session.household_id, pid)?,
                None => None,
            };
            Ok(Some((session, profile)))
        })
        .await
    }

    pub async fn set_active_profile(
        &self,
        jti_: &str,
        profile: Option<&str>,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl as s;
        let j = jti_.to_string();
        let pid = profile.map(|p| p.to_string());
        self.with_conn(move |conn| {
            let updated = diesel::update(s::sessions.filter(s::jti.eq(&j)))
                .set(s::active_profile_id.eq(pid.as_deref()))
                .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// This combines the idle timeout check and the `last_used_at` update into
    /// a single atomic UPDATE, eliminating the race condition between checking
    /// and updating the session.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }
}

/// Cascade body; must run inside a transaction.
///
/// The reward step runs last so a failure anywhere leaves every earlier
/// write to be rolled back with it.
fn cascade_delete_profile(
    conn: &mut SqliteConnection,
    household: &str,
    profile: &str,
) -> Result<CascadeReport, StorageError> {
    use schema::activity_assignees::dsl as aa;
    use schema::activity_logs::dsl as al;
    use schema::goals::dsl as g;
    use schema::inbox_items::dsl as ib;
    use schema::profiles::dsl as p;
    use schema::purchase_logs::dsl as pl;
    use schema::reward_assignees::dsl as ra;
    use schema::sessions::dsl as s;

    let deleted = diesel::delete(
        p::profiles
            .filter(p::id.eq(profile))
            .filter(p::household_id.eq(household)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(StorageError::NotFound(format!("profile {profile}")));
    }

    let mut report = CascadeReport {
        purchase_logs: diesel::delete(pl::purchase_logs.filter(pl::profile_id.eq(profile)))
            .execute(conn)?,
        activity_logs: diesel::delete(al::activity_logs.filter(al::profile_id.eq(profile)))
            .execute(conn)?,
        goals: diesel::delete(g::goals.filter(g::profile_id.eq(profile))).execute(conn)?,
        inbox_items: diesel::delete(ib::inbox_items.filter(ib::profile_id.eq(profile)))
            .execute(conn)?,
        ..Default::default()
    };
    report.sessions_cleared = diesel::update(s::sessions.filter(s::active_profile_id.eq(profile)))
        .set(s::active_profile_id.eq(None::<String>))
        .execute(conn)?;
    report.activities_unassigned =
        diesel::delete(aa::activity_assignees.filter(aa::profile_id.eq(profile))).execute(conn)?;
    report.rewards_unassigned =
        diesel::delete(ra::reward_assignees.filter(ra::profile_id.eq(profile))).execute(conn)?;
    Ok(report)
}

fn add_member(
    conn: &mut SqliteConnection,
    household: &str,
    username: &str,
) -> Result<usize, StorageError> {
    use schema::household_members::dsl as m;
    let row = NewHouseholdMember {
        household_id: household,
        username,
        joined_at: Utc::now().naive_utc(),
    };
    Ok(diesel::insert_into(m::household_members)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)?)
}

/// Gives an empty household its first parent profile and the default reward
/// catalog. Households that already have profiles are left alone.
fn bootstrap_household(
    conn: &mut SqliteConnection,
    household: &str,
    owner: &str,
) -> Result<(), StorageError> {
    use schema::profiles::dsl as p;
    let existing: i64 = p::profiles
        .filter(p::household_id.eq(household))
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Ok(());
    }
    let limits = LicenseTier::Free.limits();
    let pid = uuid::Uuid::new_v4().to_string();
    let row = NewProfile {
        id: &pid,
        household_id: household,
        kind: ProfileKind::Parent.as_str(),
        display_name: owner,
        avatar: limits.default_avatar(),
        theme: limits.default_theme(),
        stars: 0,
        xp: 0,
        pin_hash: None,
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(p::profiles).values(&row).execute(conn)?;
    for (name, cost) in DEFAULT_REWARDS {
        insert_reward(conn, household, name, *cost)?;
    }
    Ok(())
}

fn insert_reward(
    conn: &mut SqliteConnection,
    household: &str,
    name: &str,
    cost: i32,
) -> Result<Reward, StorageError> {
    use schema::rewards::dsl as r;
    let rid = uuid::Uuid::new_v4().to_string();
    let row = NewReward {
        id: &rid,
        household_id: household,
        name,
        cost,
        created_at: Utc::now().naive_utc(),
    };
    Ok(diesel::insert_into(r::rewards)
        .values(&row)
        .returning(Reward::as_returning())
        .get_result(conn)?)
}

fn find_profile(
    conn: &mut SqliteConnection,
    household: &str,
    profile: &str,
) -> Result<Option<Profile>, StorageError> {
    use schema::profiles::dsl as p;
    Ok(p::profiles
        .filter(p::id.eq(profile))
        .filter(p::household_id.eq(household))
        .select(Profile::as_select())
        .first(conn)
        .optional()?)
}

fn find_child(
    conn: &mut SqliteConnection,
    household: &str,
    profile: &str,
) -> Result<Profile, StorageError> {
    let found = find_profile(conn, household, profile)?
        .ok_or_else(|| StorageError::NotFound(format!("profile {profile}")))?;
    if found.kind != ProfileKind::Child.as_str() {
        return Err(StorageError::InvalidInput(format!(
            "profile {profile} is not a child profile"
        )));
    }
    Ok(found)
}

fn find_activity(
    conn: &mut SqliteConnection,
    household: &str,
    activity: &str,
) -> Result<Option<Activity>, StorageError> {
    use schema::activities::dsl as a;
    Ok(a::activities
        .filter(a::id.eq(activity))
        .filter(a::household_id.eq(household))
        .select(Activity::as_select())
        .first(conn)
        .optional()?)
}

fn find_reward(
    conn: &mut SqliteConnection,
    household: &str,
    reward: &str,
) -> Result<Option<Reward>, StorageError> {
    use schema::rewards::dsl as r;
    Ok(r::rewards
        .filter(r::id.eq(reward))
        .filter(r::household_id.eq(household))
        .select(Reward::as_select())
        .first(conn)
        .optional()?)
}

fn find_goal(conn: &mut SqliteConnection, household: &str, goal: &str) -> Result<Goal, StorageError> {
    use schema::goals::dsl as g;
    g::goals
        .filter(g::id.eq(goal))
        .filter(g::household_id.eq(household))
        .select(Goal::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("goal {goal}")))
}

/// Every id must name a child profile of the household.
fn ensure_children(
    conn: &mut SqliteConnection,
    household: &str,
    profile_ids: &[String],
) -> Result<(), StorageError> {
    use schema::profiles::dsl as p;
    if profile_ids.is_empty() {
        return Ok(());
    }
    let found: Vec<String> = p::profiles
        .filter(p::household_id.eq(household))
        .filter(p::kind.eq(ProfileKind::Child.as_str()))
        .filter(p::id.eq_any(profile_ids))
        .select(p::id)
        .load(conn)?;
    if let Some(missing) = profile_ids.iter().find(|id| !found.contains(id)) {
        return Err(StorageError::InvalidInput(format!(
            "{missing} is not a child profile of this household"
        )));
    }
    Ok(())
}

fn replace_activity_assignees(
    conn: &mut SqliteConnection,
    activity: &str,
    profile_ids: &[String],
) -> Result<(), StorageError> {
    use schema::activity_assignees::dsl as aa;
    diesel::delete(aa::activity_assignees.filter(aa::activity_id.eq(activity))).execute(conn)?;
    let rows: Vec<NewActivityAssignee> = profile_ids
        .iter()
        .map(|pid| NewActivityAssignee {
            activity_id: activity,
            profile_id: pid,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(aa::activity_assignees)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

fn replace_reward_assignees(
    conn: &mut SqliteConnection,
    reward: &str,
    profile_ids: &[String],
) -> Result<(), StorageError> {
    use schema::reward_assignees::dsl as ra;
    diesel::delete(ra::reward_assignees.filter(ra::reward_id.eq(reward))).execute(conn)?;
    let rows: Vec<NewRewardAssignee> = profile_ids
        .iter()
        .map(|pid| NewRewardAssignee {
            reward_id: reward,
            profile_id: pid,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(ra::reward_assignees)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

fn activity_assignee_map(
    conn: &mut SqliteConnection,
    activity_ids: &[String],
) -> Result<HashMap<String, Vec<String>>, StorageError> {
    use schema::activity_assignees::dsl as aa;
    let rows: Vec<(String, String)> = aa::activity_assignees
        .filter(aa::activity_id.eq_any(activity_ids))
        .order((aa::activity_id.asc(), aa::profile_id.asc()))
        .select((aa::activity_id, aa::profile_id))
        .load(conn)?;
    Ok(group_pairs(rows))
}

fn reward_assignee_map(
    conn: &mut SqliteConnection,
    reward_ids: &[String],
) -> Result<HashMap<String, Vec<String>>, StorageError> {
    use schema::reward_assignees::dsl as ra;
    let rows: Vec<(String, String)> = ra::reward_assignees
        .filter(ra::reward_id.eq_any(reward_ids))
        .order((ra::reward_id.asc(), ra::profile_id.asc()))
        .select((ra::reward_id, ra::profile_id))
        .load(conn)?;
    Ok(group_pairs(rows))
}

fn group_pairs(rows: Vec<(String, String)>) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in rows {
        map.entry(key).or_default().push(value);
    }
    map
}

fn append_log(
    conn: &mut SqliteConnection,
    household: &str,
    profile: &str,
    activity: Option<&str>,
    status: LogStatus,
    stars_earned: i32,
    detail: &LogDetail,
) -> Result<ActivityLog, StorageError> {
    use schema::activity_logs::dsl as al;
    let detail_json =
        serde_json::to_string(detail).map_err(|e| StorageError::InvalidData(e.to_string()))?;
    let row = NewActivityLog {
        household_id: household,
        profile_id: profile,
        activity_id: activity,
        kind: detail.kind(),
        status: status.as_str(),
        stars_earned,
        detail: &detail_json,
        created_at: Utc::now().naive_utc(),
    };
    Ok(diesel::insert_into(al::activity_logs)
        .values(&row)
        .returning(ActivityLog::as_returning())
        .get_result(conn)?)
}

/// Adds earned stars to both the spendable balance and the xp total.
fn credit_stars(
    conn: &mut SqliteConnection,
    profile: &str,
    stars: i32,
) -> Result<Profile, StorageError> {
    use schema::profiles::dsl as p;
    Ok(diesel::update(p::profiles.filter(p::id.eq(profile)))
        .set((p::stars.eq(p::stars + stars), p::xp.eq(p::xp + stars)))
        .returning(Profile::as_returning())
        .get_result(conn)?)
}

/// Refunds go back to the balance only; xp was never spent.
fn credit_refund(conn: &mut SqliteConnection, profile: &str, stars: i32) -> Result<(), StorageError> {
    use schema::profiles::dsl as p;
    diesel::update(p::profiles.filter(p::id.eq(profile)))
        .set(p::stars.eq(p::stars + stars))
        .execute(conn)?;
    Ok(())
}

fn count_children(conn: &mut SqliteConnection, household: &str) -> Result<i64, StorageError> {
    use schema::profiles::dsl as p;
    Ok(p::profiles
        .filter(p::household_id.eq(household))
        .filter(p::kind.eq(ProfileKind::Child.as_str()))
        .count()
        .get_result(conn)?)
}

fn count_activities(conn: &mut SqliteConnection, household: &str) -> Result<i64, StorageError> {
    use schema::activities::dsl as a;
    Ok(a::activities
        .filter(a::household_id.eq(household))
        .count()
        .get_result(conn)?)
}

fn count_open_goals(conn: &mut SqliteConnection, household: &str) -> Result<i64, StorageError> {
    use schema::goals::dsl as g;
    Ok(g::goals
        .filter(g::household_id.eq(household))
        .filter(g::status.eq_any(
            GoalStatus::ALL
                .iter()
                .filter(|s| s.is_open())
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
        ))
        .count()
        .get_result(conn)?)
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

/// `(offset, limit)` for a 1-based page. Oversized pages saturate to an
/// offset past every row.
fn page_window(page: usize, per_page: usize) -> (i64, i64) {
    let page = i64::try_from(page.max(1)).unwrap_or(i64::MAX);
    let per_page = per_page.clamp(1, 1000) as i64;
    ((page - 1).saturating_mul(per_page), per_page)
}

fn parse_rfc3339(s: &str) -> Result<NaiveDateTime, StorageError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .map_err(|e| StorageError::InvalidInput(format!("invalid timestamp {s}: {e}")))
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests;
