use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, Weekday};

use doctor_cell::models::{day_of_week, DoctorError, SlotRequest, Unavailable};
use doctor_cell::services::AvailabilityService;
use shared_database::test_utils::{hm, Fixtures};
use shared_database::{AppState, Database};
use shared_utils::test_utils::{days_from_today, next_weekday, TestConfig};

struct Clinic {
    state: Arc<AppState>,
    doctor_id: i64,
    patient_id: i64,
    monday: NaiveDate,
}

/// One doctor working Mondays 09:00-17:00 in 30 minute slots.
async fn clinic() -> Clinic {
    let db = Database::in_memory().await.unwrap();
    let fixtures = Fixtures::new(&db);

    let doctor_id = fixtures.doctor("Meredith", "Grey", "General Surgery").await.unwrap();
    let patient_id = fixtures.patient("Jane", "Doe").await.unwrap();
    fixtures
        .schedule(doctor_id, 0, hm(9, 0), hm(17, 0), 30, 0, true)
        .await
        .unwrap();

    Clinic {
        state: AppState::new(TestConfig::default().to_app_config(), db),
        doctor_id,
        patient_id,
        monday: next_weekday(Weekday::Mon),
    }
}

fn slot(clinic: &Clinic, date: NaiveDate, h: u32, m: u32, duration: Option<i64>) -> SlotRequest {
    SlotRequest {
        doctor_id: clinic.doctor_id,
        date,
        start_time: hm(h, m),
        duration_minutes: duration,
        exclude_appointment_id: None,
    }
}

#[tokio::test]
async fn test_booked_slot_conflicts_and_neighbour_is_free() {
    let clinic = clinic().await;
    Fixtures::new(&clinic.state.db)
        .appointment(clinic.doctor_id, clinic.patient_id, clinic.monday, hm(10, 0), hm(10, 30), "scheduled")
        .await
        .unwrap();
    let service = AvailabilityService::new(&clinic.state);

    let taken = service.check_availability(slot(&clinic, clinic.monday, 10, 0, Some(30))).await.unwrap();
    assert_eq!(taken.outcome, Err(Unavailable::Conflict { start: hm(10, 0) }));
    assert_eq!(
        taken.to_check().reason.as_deref(),
        Some("Appointment conflicts with an existing appointment at 10:00")
    );

    let next = service.check_availability(slot(&clinic, clinic.monday, 10, 30, Some(30))).await.unwrap();
    assert!(next.is_available());
    assert_eq!(next.end_time(), Some(hm(11, 0)));

    let early = service.check_availability(slot(&clinic, clinic.monday, 8, 30, Some(30))).await.unwrap();
    assert_eq!(early.outcome, Err(Unavailable::OutsideWorkingHours));
}

#[tokio::test]
async fn test_cancelled_and_no_show_do_not_block() {
    let clinic = clinic().await;
    let fixtures = Fixtures::new(&clinic.state.db);
    fixtures
        .appointment(clinic.doctor_id, clinic.patient_id, clinic.monday, hm(10, 0), hm(10, 30), "cancelled")
        .await
        .unwrap();
    fixtures
        .appointment(clinic.doctor_id, clinic.patient_id, clinic.monday, hm(11, 0), hm(11, 30), "no_show")
        .await
        .unwrap();
    let service = AvailabilityService::new(&clinic.state);

    for (h, m) in [(10, 0), (11, 0)] {
        let decision = service.check_availability(slot(&clinic, clinic.monday, h, m, Some(30))).await.unwrap();
        assert!(decision.is_available(), "{:02}:{:02} should be free", h, m);
    }
}

#[tokio::test]
async fn test_excluded_appointment_does_not_conflict_with_itself() {
    let clinic = clinic().await;
    let appointment_id = Fixtures::new(&clinic.state.db)
        .appointment(clinic.doctor_id, clinic.patient_id, clinic.monday, hm(10, 0), hm(10, 30), "confirmed")
        .await
        .unwrap();
    let service = AvailabilityService::new(&clinic.state);

    let mut request = slot(&clinic, clinic.monday, 10, 15, Some(30));
    assert!(!service.check_availability(request).await.unwrap().is_available());

    request.exclude_appointment_id = Some(appointment_id);
    assert!(service.check_availability(request).await.unwrap().is_available());
}

#[tokio::test]
async fn test_missing_duration_uses_schedule_slot_length() {
    let clinic = clinic().await;
    Fixtures::new(&clinic.state.db)
        .schedule(clinic.doctor_id, 1, hm(13, 0), hm(18, 0), 45, 0, true)
        .await
        .unwrap();
    let service = AvailabilityService::new(&clinic.state);

    let monday = service.check_availability(slot(&clinic, clinic.monday, 9, 0, None)).await.unwrap();
    assert_eq!(monday.duration_minutes, 30);

    let tuesday = next_weekday(Weekday::Tue);
    let decision = service.check_availability(slot(&clinic, tuesday, 13, 0, None)).await.unwrap();
    assert_eq!(decision.duration_minutes, 45);
    assert_eq!(decision.end_time(), Some(hm(13, 45)));
}

#[tokio::test]
async fn test_past_and_closed_days() {
    let clinic = clinic().await;
    let service = AvailabilityService::new(&clinic.state);

    let yesterday = service
        .check_availability(slot(&clinic, days_from_today(-1), 10, 0, Some(30)))
        .await
        .unwrap();
    assert_eq!(yesterday.outcome, Err(Unavailable::PastDate));

    let wednesday = service
        .check_availability(slot(&clinic, next_weekday(Weekday::Wed), 10, 0, Some(30)))
        .await
        .unwrap();
    assert_eq!(wednesday.outcome, Err(Unavailable::NoOfficeHours));
}

#[tokio::test]
async fn test_unknown_doctor_is_not_found() {
    let clinic = clinic().await;
    let service = AvailabilityService::new(&clinic.state);

    let mut request = slot(&clinic, clinic.monday, 10, 0, Some(30));
    request.doctor_id = 999;
    assert_matches!(service.check_availability(request).await, Err(DoctorError::NotFound));
    assert_matches!(
        service.available_slots(999, clinic.monday, None).await,
        Err(DoctorError::NotFound)
    );
}

#[tokio::test]
async fn test_available_slots_skip_bookings() {
    let clinic = clinic().await;
    Fixtures::new(&clinic.state.db)
        .appointment(clinic.doctor_id, clinic.patient_id, clinic.monday, hm(10, 15), hm(11, 0), "scheduled")
        .await
        .unwrap();
    let service = AvailabilityService::new(&clinic.state);

    let slots = service.available_slots(clinic.doctor_id, clinic.monday, None).await.unwrap();
    let starts: Vec<_> = slots.iter().map(|s| s.start).collect();

    assert_eq!(slots.len(), 16 - 2);
    assert!(!starts.contains(&hm(10, 0)));
    assert!(!starts.contains(&hm(10, 30)));
    assert!(starts.contains(&hm(11, 0)));
    assert!(slots.iter().all(|s| s.end <= hm(17, 0)));
    assert!(starts.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_available_slots_empty_without_schedule_or_in_past() {
    let clinic = clinic().await;
    let service = AvailabilityService::new(&clinic.state);

    let wednesday = service
        .available_slots(clinic.doctor_id, next_weekday(Weekday::Wed), None)
        .await
        .unwrap();
    assert!(wednesday.is_empty());

    let yesterday = days_from_today(-1);
    Fixtures::new(&clinic.state.db)
        .schedule(clinic.doctor_id, day_of_week(yesterday), hm(18, 0), hm(20, 0), 30, 0, true)
        .await
        .unwrap();
    let past = service
        .available_slots(clinic.doctor_id, yesterday, None)
        .await
        .unwrap();
    assert!(past.is_empty());
}

#[tokio::test]
async fn test_available_slots_today_only_after_now() {
    let clinic = clinic().await;
    let service = AvailabilityService::new(&clinic.state);

    let noon = clinic.monday.and_hms_opt(12, 0, 0).unwrap();
    let slots = service
        .available_slots_at(clinic.doctor_id, clinic.monday, None, noon)
        .await
        .unwrap();

    assert_eq!(slots.first().map(|s| s.start), Some(hm(12, 30)));
    assert_eq!(slots.len(), 9);
}

#[tokio::test]
async fn test_every_listed_slot_is_bookable() {
    let clinic = clinic().await;
    Fixtures::new(&clinic.state.db)
        .appointment(clinic.doctor_id, clinic.patient_id, clinic.monday, hm(14, 0), hm(15, 0), "confirmed")
        .await
        .unwrap();
    let service = AvailabilityService::new(&clinic.state);

    for s in service.available_slots(clinic.doctor_id, clinic.monday, None).await.unwrap() {
        let request = SlotRequest {
            start_time: s.start,
            ..slot(&clinic, clinic.monday, 0, 0, Some(s.duration_minutes()))
        };
        assert!(service.check_availability(request).await.unwrap().is_available());
    }
}
