use super::*;

async fn temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let store = Store::connect_sqlite(path.to_str().unwrap()).await.unwrap();
    (store, dir)
}

struct Family {
    household: String,
    parent: Profile,
    kid: Profile,
    sibling: Profile,
}

async fn family(store: &Store) -> Family {
    let household = store.create_household_for("alice").await.unwrap().id;
    let parent = store
        .list_profiles(&household)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let kid = store
        .create_profile(&household, ProfileKind::Child, "Kid", "bear", "sunny", None)
        .await
        .unwrap();
    let sibling = store
        .create_profile(&household, ProfileKind::Child, "Sibling", "cat", "sunny", None)
        .await
        .unwrap();
    Family {
        household,
        parent,
        kid,
        sibling,
    }
}

async fn routine(store: &Store, household: &str, stars: i32, assignees: &[String]) -> Activity {
    let steps = r#"[{"title":"Brush teeth"},{"title":"Make bed"}]"#;
    store
        .create_activity(household, "Morning", steps, r#"{"kind":"daily"}"#, stars, assignees)
        .await
        .unwrap()
        .0
}

#[tokio::test]
async fn new_household_gets_parent_and_default_rewards() {
    let (store, _dir) = temp_store().await;
    let household = store.create_household_for("alice").await.unwrap();
    assert_eq!(household.license_tier(), LicenseTier::Free);

    let profiles = store.list_profiles(&household.id).await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].kind, "parent");
    assert_eq!(profiles[0].display_name, "alice");

    let rewards = store.list_rewards(&household.id, None).await.unwrap();
    assert_eq!(rewards.len(), DEFAULT_REWARDS.len());
    assert_eq!(
        store.memberships("alice").await.unwrap(),
        vec![household.id.clone()]
    );

    assert!(store.join_household(&household.id, "bob").await.unwrap());
    assert!(!store.join_household(&household.id, "bob").await.unwrap());
    assert_eq!(
        store.household_members(&household.id).await.unwrap(),
        vec!["alice".to_string(), "bob".to_string()]
    );
    assert!(matches!(
        store.join_household("missing", "bob").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn seeded_household_keeps_license_and_expiry() {
    let (store, _dir) = temp_store().await;
    let seed = HouseholdSeed {
        id: "smiths".into(),
        license: LicenseTier::Pro,
        license_expires_at: Some("2001-01-01T00:00:00Z".into()),
        members: vec!["alice".into()],
    };
    store.seed_households(std::slice::from_ref(&seed)).await.unwrap();
    // Seeding twice must not duplicate the bootstrap profile.
    store.seed_households(&[seed]).await.unwrap();

    let household = store.get_household("smiths").await.unwrap().unwrap();
    assert_eq!(household.license_tier(), LicenseTier::Pro);
    assert_eq!(
        household.effective_tier(Utc::now().naive_utc()),
        LicenseTier::Free
    );
    assert_eq!(store.list_profiles("smiths").await.unwrap().len(), 1);
}

#[tokio::test]
async fn cascade_removes_every_reference() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let both = vec![f.kid.id.clone(), f.sibling.id.clone()];

    let activity = routine(&store, &f.household, 5, &both).await;
    let (reward, _) = store
        .create_reward(&f.household, "Ice cream", 3, &both)
        .await
        .unwrap();
    store
        .complete_activity(&f.household, &f.kid.id, &activity.id, None)
        .await
        .unwrap();
    store
        .purchase_reward(&f.household, &f.kid.id, &reward.id)
        .await
        .unwrap();
    store
        .create_goal(&f.household, &f.kid.id, "Bike", 50, GoalStatus::Active)
        .await
        .unwrap();
    store
        .grant_stars(&f.household, &f.kid.id, 2, "helped", "alice")
        .await
        .unwrap();
    store.create_session("jti-1", "alice", &f.household).await.unwrap();
    store.set_active_profile("jti-1", Some(&f.kid.id)).await.unwrap();

    let report = store
        .delete_profile_cascade(&f.household, &f.kid.id)
        .await
        .unwrap();
    assert_eq!(
        report,
        CascadeReport {
            purchase_logs: 1,
            activity_logs: 1,
            goals: 1,
            inbox_items: 1,
            sessions_cleared: 1,
            activities_unassigned: 1,
            rewards_unassigned: 1,
        }
    );

    assert!(store.get_profile(&f.household, &f.kid.id).await.unwrap().is_none());
    let activities = store.list_activities(&f.household, None).await.unwrap();
    assert_eq!(activities.len(), 1, "activity itself is kept");
    assert_eq!(activities[0].1, vec![f.sibling.id.clone()]);
    let rewards = store.list_rewards(&f.household, None).await.unwrap();
    let custom = rewards.iter().find(|(r, _)| r.id == reward.id).unwrap();
    assert_eq!(custom.1, vec![f.sibling.id.clone()]);
    assert!(store.list_purchases(&f.household, &f.kid.id).await.unwrap().is_empty());
    assert!(
        store
            .list_activity_logs(&f.household, &f.kid.id, 1, 100)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(store.list_goals(&f.household, &f.kid.id).await.unwrap().is_empty());
    assert!(store.list_inbox(&f.household, &f.kid.id, true).await.unwrap().is_empty());
    let (session, active) = store.get_session("jti-1").await.unwrap().unwrap();
    assert!(session.active_profile_id.is_none());
    assert!(active.is_none());

    // The sibling's data is untouched.
    assert!(store.get_profile(&f.household, &f.sibling.id).await.unwrap().is_some());
}

#[tokio::test]
async fn cascade_leaves_sole_assignee_routine_unassigned() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let activity = routine(&store, &f.household, 4, std::slice::from_ref(&f.kid.id)).await;

    let report = store
        .delete_profile_cascade(&f.household, &f.kid.id)
        .await
        .unwrap();
    assert_eq!(report.activities_unassigned, 1);

    let activities = store.list_activities(&f.household, None).await.unwrap();
    assert_eq!(activities.len(), 1);
    let (kept, assignees) = &activities[0];
    assert_eq!(kept.id, activity.id);
    assert!(assignees.is_empty());
    assert_eq!(store.count_activities(&f.household).await.unwrap(), 1);
}

#[tokio::test]
async fn cascade_of_unknown_profile_writes_nothing() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let other = store.create_household_for("bob").await.unwrap().id;

    assert!(matches!(
        store.delete_profile_cascade(&f.household, "nope").await,
        Err(StorageError::NotFound(_))
    ));
    // A profile from another household is invisible here.
    assert!(matches!(
        store.delete_profile_cascade(&other, &f.kid.id).await,
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(store.list_profiles(&f.household).await.unwrap().len(), 3);
}

#[tokio::test]
async fn cascade_rolls_back_when_a_step_fails() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let kid = vec![f.kid.id.clone()];
    let activity = routine(&store, &f.household, 4, &kid).await;
    store
        .create_reward(&f.household, "Sticker", 1, &kid)
        .await
        .unwrap();
    store
        .complete_activity(&f.household, &f.kid.id, &activity.id, None)
        .await
        .unwrap();

    {
        let mut conn = store.pool.get().unwrap();
        diesel::sql_query(
            "CREATE TRIGGER fail_unassign BEFORE DELETE ON reward_assignees \
             BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
        )
        .execute(&mut *conn)
        .unwrap();
    }

    let err = store
        .delete_profile_cascade(&f.household, &f.kid.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Database(_)), "{err}");

    let kid_after = store.get_profile(&f.household, &f.kid.id).await.unwrap();
    assert_eq!(kid_after.map(|p| p.stars), Some(4));
    assert_eq!(
        store
            .list_activity_logs(&f.household, &f.kid.id, 1, 10)
            .await
            .unwrap()
            .len(),
        1
    );
    let activities = store.list_activities(&f.household, Some(&f.kid.id)).await.unwrap();
    assert_eq!(activities.len(), 1);
}

#[tokio::test]
async fn partial_completion_earns_nothing() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let activity = routine(&store, &f.household, 5, std::slice::from_ref(&f.kid.id)).await;

    let (log, balance) = store
        .complete_activity(&f.household, &f.kid.id, &activity.id, Some(1))
        .await
        .unwrap();
    assert_eq!(log.status, "partial");
    assert_eq!(log.stars_earned, 0);
    assert_eq!(balance.stars, 0);
    let detail: LogDetail = serde_json::from_str(&log.detail).unwrap();
    assert_eq!(
        detail,
        LogDetail::RoutineCompletion {
            activity_name: "Morning".into(),
            steps_completed: 1,
            steps_total: 2,
        }
    );

    let (log, balance) = store
        .complete_activity(&f.household, &f.kid.id, &activity.id, None)
        .await
        .unwrap();
    assert_eq!(log.status, "completed");
    assert_eq!((balance.stars, balance.xp), (5, 5));

    assert!(matches!(
        store
            .complete_activity(&f.household, &f.sibling.id, &activity.id, None)
            .await,
        Err(StorageError::Rejected(_))
    ));
    assert!(matches!(
        store
            .complete_activity(&f.household, &f.kid.id, &activity.id, Some(3))
            .await,
        Err(StorageError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn purchase_needs_stars_and_reject_refunds() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let (reward, _) = store
        .create_reward(&f.household, "Zoo trip", 8, &[])
        .await
        .unwrap();

    let err = store
        .purchase_reward(&f.household, &f.kid.id, &reward.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Rejected(_)));
    assert!(store.list_purchases(&f.household, &f.kid.id).await.unwrap().is_empty());

    let item = store
        .grant_stars(&f.household, &f.kid.id, 10, "chores", "alice")
        .await
        .unwrap();
    store
        .claim_inbox_item(&f.household, &f.kid.id, item.id)
        .await
        .unwrap();

    let purchase = store
        .purchase_reward(&f.household, &f.kid.id, &reward.id)
        .await
        .unwrap();
    assert_eq!(purchase.status, "pending");
    assert_eq!(purchase.reward_cost, 8);
    let kid = store.get_profile(&f.household, &f.kid.id).await.unwrap().unwrap();
    assert_eq!(kid.stars, 2);

    // Claiming before approval is not a valid transition.
    assert!(matches!(
        store
            .transition_purchase(&f.household, purchase.id, PurchaseStatus::Claimed, Some(&f.kid.id))
            .await,
        Err(StorageError::Conflict(_))
    ));

    let rejected = store
        .transition_purchase(&f.household, purchase.id, PurchaseStatus::Rejected, None)
        .await
        .unwrap();
    assert_eq!(rejected.status, "rejected");
    let kid = store.get_profile(&f.household, &f.kid.id).await.unwrap().unwrap();
    assert_eq!((kid.stars, kid.xp), (10, 10));
}

#[tokio::test]
async fn purchase_flow_to_claimed() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let (reward, _) = store
        .create_reward(&f.household, "Sticker", 1, std::slice::from_ref(&f.sibling.id))
        .await
        .unwrap();
    let item = store
        .grant_stars(&f.household, &f.kid.id, 3, "reading", "alice")
        .await
        .unwrap();
    store
        .claim_inbox_item(&f.household, &f.kid.id, item.id)
        .await
        .unwrap();

    // Restricted to the sibling.
    assert!(matches!(
        store.purchase_reward(&f.household, &f.kid.id, &reward.id).await,
        Err(StorageError::Rejected(_))
    ));
    let visible = store.list_rewards(&f.household, Some(&f.kid.id)).await.unwrap();
    assert!(visible.iter().all(|(r, _)| r.id != reward.id));

    store
        .set_reward_assignees(&f.household, &reward.id, &[])
        .await
        .unwrap();
    let purchase = store
        .purchase_reward(&f.household, &f.kid.id, &reward.id)
        .await
        .unwrap();
    store
        .transition_purchase(&f.household, purchase.id, PurchaseStatus::Approved, None)
        .await
        .unwrap();
    // Another child cannot claim it.
    assert!(matches!(
        store
            .transition_purchase(&f.household, purchase.id, PurchaseStatus::Claimed, Some(&f.sibling.id))
            .await,
        Err(StorageError::NotFound(_))
    ));
    let claimed = store
        .transition_purchase(&f.household, purchase.id, PurchaseStatus::Claimed, Some(&f.kid.id))
        .await
        .unwrap();
    assert_eq!(claimed.status, "claimed");
}

#[tokio::test]
async fn inbox_claim_is_single_use() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let item = store
        .grant_stars(&f.household, &f.kid.id, 4, "helped cook", &f.parent.display_name)
        .await
        .unwrap();
    assert_eq!(store.list_inbox(&f.household, &f.kid.id, false).await.unwrap().len(), 1);

    let (claimed, balance) = store
        .claim_inbox_item(&f.household, &f.kid.id, item.id)
        .await
        .unwrap();
    assert!(claimed.claimed_at.is_some());
    assert_eq!(balance.stars, 4);
    assert!(matches!(
        store.claim_inbox_item(&f.household, &f.kid.id, item.id).await,
        Err(StorageError::Conflict(_))
    ));
    assert!(store.list_inbox(&f.household, &f.kid.id, false).await.unwrap().is_empty());

    let logs = store
        .list_activity_logs(&f.household, &f.kid.id, 1, 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, "manual_award");
    assert!(logs[0].activity_id.is_none());

    // Parents do not receive grants.
    assert!(matches!(
        store
            .grant_stars(&f.household, &f.parent.id, 1, "x", "alice")
            .await,
        Err(StorageError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn goal_progress_completes_goal() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let goal = store
        .create_goal(&f.household, &f.kid.id, "Lego set", 10, GoalStatus::PendingApproval)
        .await
        .unwrap();
    assert_eq!(store.count_open_goals(&f.household).await.unwrap(), 1);

    assert!(matches!(
        store.record_goal_progress(&f.household, &goal.id, 3).await,
        Err(StorageError::Conflict(_))
    ));
    store
        .transition_goal(&f.household, &goal.id, GoalStatus::Active)
        .await
        .unwrap();
    let g = store.record_goal_progress(&f.household, &goal.id, 6).await.unwrap();
    assert_eq!((g.progress, g.status.as_str()), (6, "active"));
    let g = store.record_goal_progress(&f.household, &goal.id, 6).await.unwrap();
    assert_eq!((g.progress, g.status.as_str()), (12, "completed"));
    assert_eq!(store.count_open_goals(&f.household).await.unwrap(), 0);

    let logs = store
        .list_activity_logs(&f.household, &f.kid.id, 1, 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.kind == "goal_progress"));
}

#[tokio::test]
async fn assignments_only_accept_children_of_the_household() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let err = store
        .create_reward(&f.household, "Cake", 5, std::slice::from_ref(&f.parent.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    let activity = routine(&store, &f.household, 1, &[]).await;
    let set = store
        .set_activity_assignees(
            &f.household,
            &activity.id,
            &[f.kid.id.clone(), f.kid.id.clone()],
        )
        .await
        .unwrap();
    assert_eq!(set, vec![f.kid.id.clone()]);
    assert_eq!(
        store
            .list_activities(&f.household, Some(&f.sibling.id))
            .await
            .unwrap()
            .len(),
        0
    );
    assert!(store.delete_activity(&f.household, &activity.id).await.unwrap());
    assert!(!store.delete_activity(&f.household, &activity.id).await.unwrap());
}

#[tokio::test]
async fn usage_and_analytics_counts() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let activity = routine(&store, &f.household, 2, std::slice::from_ref(&f.kid.id)).await;
    store
        .complete_activity(&f.household, &f.kid.id, &activity.id, None)
        .await
        .unwrap();
    store
        .complete_activity(&f.household, &f.kid.id, &activity.id, Some(0))
        .await
        .unwrap();
    store
        .create_goal(&f.household, &f.sibling.id, "Kite", 5, GoalStatus::Active)
        .await
        .unwrap();

    let usage = store.household_usage(&f.household).await.unwrap();
    assert_eq!(
        usage,
        HouseholdUsage {
            children: 2,
            routines: 1,
            open_goals: 1,
        }
    );

    let summaries = store.child_summaries(&f.household).await.unwrap();
    assert_eq!(summaries.len(), 2);
    let kid = summaries.iter().find(|s| s.profile.id == f.kid.id).unwrap();
    assert_eq!((kid.completions, kid.stars_earned, kid.purchases), (1, 2, 0));
    let sibling = summaries.iter().find(|s| s.profile.id == f.sibling.id).unwrap();
    assert_eq!(sibling.completions, 0);
}

#[tokio::test]
async fn session_touch_respects_cutoff() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    store.create_session("j1", "alice", &f.household).await.unwrap();

    let past = Utc::now().naive_utc() - chrono::Duration::days(1);
    assert!(store.touch_session_with_cutoff("j1", past).await.unwrap());
    let future = Utc::now().naive_utc() + chrono::Duration::days(1);
    assert!(!store.touch_session_with_cutoff("j1", future).await.unwrap());

    assert!(store.set_active_profile("j1", Some(&f.parent.id)).await.unwrap());
    let (_, active) = store.get_session("j1").await.unwrap().unwrap();
    assert_eq!(active.map(|p| p.id), Some(f.parent.id.clone()));

    assert!(store.delete_session("j1").await.unwrap());
    assert!(store.get_session("j1").await.unwrap().is_none());
}

#[tokio::test]
async fn profile_update_and_pin_removal() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let updated = store
        .update_profile(
            &f.household,
            &f.parent.id,
            ProfileChanges {
                pin_hash: Some(Some("hash".into())),
                theme: Some("sunny".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.pin_hash.as_deref(), Some("hash"));

    let cleared = store
        .update_profile(
            &f.household,
            &f.parent.id,
            ProfileChanges {
                pin_hash: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cleared.pin_hash.is_none());

    assert!(matches!(
        store
            .update_profile(&f.household, "ghost", ProfileChanges::default())
            .await,
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn page_window_saturates_on_huge_pages() {
    assert_eq!(page_window(0, 20), (0, 20));
    assert_eq!(page_window(3, 20), (40, 20));
    assert_eq!(page_window(2, 0), (1, 1));
    assert_eq!(page_window(1usize << 62, 1000), (i64::MAX, 1000));
    assert_eq!(page_window(usize::MAX, 1000), (i64::MAX, 1000));
}

#[tokio::test]
async fn far_page_of_logs_is_empty() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let activity = routine(&store, &f.household, 2, std::slice::from_ref(&f.kid.id)).await;
    store
        .complete_activity(&f.household, &f.kid.id, &activity.id, None)
        .await
        .unwrap();
    let first = store
        .list_activity_logs(&f.household, &f.kid.id, 1, 20)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    let far = store
        .list_activity_logs(&f.household, &f.kid.id, usize::MAX, 20)
        .await
        .unwrap();
    assert!(far.is_empty());
}

#[tokio::test]
async fn only_open_goals_count() {
    let (store, _dir) = temp_store().await;
    let f = family(&store).await;
    let done = store
        .create_goal(&f.household, &f.kid.id, "Kite", 1, GoalStatus::Active)
        .await
        .unwrap();
    store
        .record_goal_progress(&f.household, &done.id, 1)
        .await
        .unwrap();
    let proposed = store
        .create_goal(&f.household, &f.kid.id, "Pony", 500, GoalStatus::PendingApproval)
        .await
        .unwrap();
    store
        .create_goal(&f.household, &f.sibling.id, "Lego", 40, GoalStatus::PendingApproval)
        .await
        .unwrap();
    assert_eq!(store.count_open_goals(&f.household).await.unwrap(), 2);

    store
        .transition_goal(&f.household, &proposed.id, GoalStatus::Rejected)
        .await
        .unwrap();
    assert_eq!(store.count_open_goals(&f.household).await.unwrap(), 1);
}
