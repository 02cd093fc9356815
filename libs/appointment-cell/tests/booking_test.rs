use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

use appointment_cell::models::{
    AppointmentError, AppointmentFilters, AppointmentStatus, BookAppointmentRequest,
    UpdateAppointmentRequest,
};
use appointment_cell::services::AppointmentBookingService;
use shared_database::test_utils::{hm, Fixtures};
use shared_database::{AppState, Database};
use shared_models::auth::User;
use shared_utils::test_utils::{days_from_today, next_weekday, TestConfig, TestUser};

struct Clinic {
    state: Arc<AppState>,
    doctor_id: i64,
    patient_id: i64,
    other_patient_id: i64,
    monday: NaiveDate,
}

/// One doctor working Mondays 09:00-17:00 in 30 minute slots, two patients.
async fn clinic_on(db: Database) -> Clinic {
    let fixtures = Fixtures::new(&db);

    let doctor_id = fixtures.doctor("Meredith", "Grey", "General Surgery").await.unwrap();
    let patient_id = fixtures.patient("Jane", "Doe").await.unwrap();
    let other_patient_id = fixtures.patient("John", "Roe").await.unwrap();
    fixtures
        .schedule(doctor_id, 0, hm(9, 0), hm(17, 0), 30, 0, true)
        .await
        .unwrap();

    Clinic {
        state: AppState::new(TestConfig::default().to_app_config(), db),
        doctor_id,
        patient_id,
        other_patient_id,
        monday: next_weekday(Weekday::Mon),
    }
}

async fn clinic() -> Clinic {
    clinic_on(Database::in_memory().await.unwrap()).await
}

fn request(clinic: &Clinic, start: NaiveTime) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: None,
        doctor_id: clinic.doctor_id,
        appointment_date: clinic.monday,
        start_time: start,
        end_time: None,
        duration_minutes: None,
        reason: Some("Annual check-up".to_string()),
        notes: None,
    }
}

fn patient(clinic: &Clinic) -> User {
    TestUser::patient(clinic.patient_id).to_user()
}

fn receptionist() -> User {
    TestUser::receptionist().to_user()
}

#[tokio::test]
async fn test_patient_books_slot_with_schedule_duration() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    let appointment = service
        .book_appointment(&patient(&clinic), request(&clinic, hm(10, 0)))
        .await
        .unwrap();

    assert_eq!(appointment.patient_id, clinic.patient_id);
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.end_time, hm(10, 30));
    assert_eq!(appointment.reason.as_deref(), Some("Annual check-up"));
}

#[tokio::test]
async fn test_explicit_end_time_and_duration_are_honoured() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);
    let user = patient(&clinic);

    let mut long = request(&clinic, hm(9, 0));
    long.end_time = Some(hm(10, 0));
    assert_eq!(service.book_appointment(&user, long).await.unwrap().end_time, hm(10, 0));

    let mut short = request(&clinic, hm(10, 0));
    short.duration_minutes = Some(15);
    assert_eq!(service.book_appointment(&user, short).await.unwrap().end_time, hm(10, 15));
}

#[tokio::test]
async fn test_second_booking_of_same_slot_conflicts() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    service
        .book_appointment(&patient(&clinic), request(&clinic, hm(10, 0)))
        .await
        .unwrap();

    let err = service
        .book_appointment(
            &TestUser::patient(clinic.other_patient_id).to_user(),
            request(&clinic, hm(10, 15)),
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        AppointmentError::SlotUnavailable(reason)
            if reason == "Appointment conflicts with an existing appointment at 10:00"
    );
}

#[tokio::test]
async fn test_rejections_carry_the_resolver_reason() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);
    let user = patient(&clinic);

    assert_matches!(
        service.book_appointment(&user, request(&clinic, hm(8, 30))).await,
        Err(AppointmentError::SlotUnavailable(reason))
            if reason == "Requested time is outside of doctor's working hours"
    );

    let mut tuesday = request(&clinic, hm(10, 0));
    tuesday.appointment_date = clinic.monday.succ_opt().unwrap();
    assert_matches!(
        service.book_appointment(&user, tuesday).await,
        Err(AppointmentError::SlotUnavailable(reason))
            if reason == "Doctor does not have office hours on this day"
    );

    let yesterday = days_from_today(-1);
    Fixtures::new(&clinic.state.db)
        .schedule(
            clinic.doctor_id,
            yesterday.weekday().num_days_from_monday() as i32,
            hm(0, 0),
            hm(23, 30),
            30,
            0,
            true,
        )
        .await
        .unwrap();
    let mut past = request(&clinic, hm(10, 0));
    past.appointment_date = yesterday;
    assert_matches!(
        service.book_appointment(&user, past).await,
        Err(AppointmentError::SlotUnavailable(reason)) if reason == "Cannot book appointments in the past"
    );
}

#[tokio::test]
async fn test_cancelled_appointment_frees_its_slot() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);
    let user = patient(&clinic);

    let first = service.book_appointment(&user, request(&clinic, hm(11, 0))).await.unwrap();
    service
        .update_status(&user, first.id, AppointmentStatus::Cancelled)
        .await
        .unwrap();

    let second = service
        .book_appointment(
            &TestUser::patient(clinic.other_patient_id).to_user(),
            request(&clinic, hm(11, 0)),
        )
        .await
        .unwrap();
    assert_eq!(second.start_time, hm(11, 0));
}

#[tokio::test]
async fn test_who_may_book_for_whom() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    // A patient's own id wins over whatever the body says
    let mut spoofed = request(&clinic, hm(9, 0));
    spoofed.patient_id = Some(clinic.other_patient_id);
    let appointment = service.book_appointment(&patient(&clinic), spoofed).await.unwrap();
    assert_eq!(appointment.patient_id, clinic.patient_id);

    assert_matches!(
        service
            .book_appointment(&TestUser::doctor(clinic.doctor_id).to_user(), request(&clinic, hm(9, 30)))
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    assert_matches!(
        service.book_appointment(&receptionist(), request(&clinic, hm(9, 30))).await,
        Err(AppointmentError::Validation(msg)) if msg == "patient_id is required"
    );

    let mut for_patient = request(&clinic, hm(9, 30));
    for_patient.patient_id = Some(clinic.other_patient_id);
    let booked = service.book_appointment(&receptionist(), for_patient).await.unwrap();
    assert_eq!(booked.patient_id, clinic.other_patient_id);

    let mut unknown = request(&clinic, hm(12, 0));
    unknown.patient_id = Some(999);
    assert_matches!(
        service.book_appointment(&receptionist(), unknown).await,
        Err(AppointmentError::PatientNotFound)
    );
}

#[tokio::test]
async fn test_booking_input_is_validated() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);
    let user = patient(&clinic);

    let mut no_reason = request(&clinic, hm(9, 0));
    no_reason.reason = None;
    assert_matches!(
        service.book_appointment(&user, no_reason).await,
        Err(AppointmentError::Validation(msg)) if msg == "Reason is required"
    );

    let mut short_reason = request(&clinic, hm(9, 0));
    short_reason.reason = Some("ok".to_string());
    assert_matches!(
        service.book_appointment(&user, short_reason).await,
        Err(AppointmentError::Validation(_))
    );

    let mut backwards = request(&clinic, hm(9, 0));
    backwards.end_time = Some(hm(8, 30));
    assert_matches!(
        service.book_appointment(&user, backwards).await,
        Err(AppointmentError::Validation(_))
    );

    let mut endless = request(&clinic, hm(9, 0));
    endless.duration_minutes = Some(1_000_000_000_000_000);
    assert_matches!(
        service.book_appointment(&user, endless).await,
        Err(AppointmentError::SlotUnavailable(reason))
            if reason == "Requested time is outside of doctor's working hours"
    );
    // The write lock was released, so the next booking goes through
    service.book_appointment(&user, request(&clinic, hm(9, 0))).await.unwrap();

    let mut missing_doctor = request(&clinic, hm(9, 0));
    missing_doctor.doctor_id = 404;
    assert_matches!(
        service.book_appointment(&user, missing_doctor).await,
        Err(AppointmentError::DoctorNotFound)
    );

    let retired = Fixtures::new(&clinic.state.db)
        .doctor_with_status("Old", "Timer", "General", false)
        .await
        .unwrap();
    let mut inactive = request(&clinic, hm(9, 0));
    inactive.doctor_id = retired;
    assert_matches!(
        service.book_appointment(&user, inactive).await,
        Err(AppointmentError::DoctorInactive)
    );
}

#[tokio::test]
async fn test_reschedule_ignores_itself_but_not_others() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    let first = service.book_appointment(&patient(&clinic), request(&clinic, hm(10, 0))).await.unwrap();
    service
        .book_appointment(
            &TestUser::patient(clinic.other_patient_id).to_user(),
            request(&clinic, hm(11, 0)),
        )
        .await
        .unwrap();

    // Shifting by 15 minutes overlaps only its own old interval
    let moved = service
        .update_appointment(
            &receptionist(),
            first.id,
            UpdateAppointmentRequest {
                start_time: Some(hm(10, 15)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.start_time, hm(10, 15));
    assert_eq!(moved.end_time, hm(10, 45));

    let err = service
        .update_appointment(
            &receptionist(),
            first.id,
            UpdateAppointmentRequest {
                start_time: Some(hm(10, 45)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, AppointmentError::SlotUnavailable(_));

    let unchanged = service.get_appointment(&receptionist(), first.id).await.unwrap();
    assert_eq!(unchanged.start_time, hm(10, 15));

    assert_matches!(
        service
            .update_appointment(&patient(&clinic), first.id, UpdateAppointmentRequest::default())
            .await,
        Err(AppointmentError::Forbidden(_))
    );
}

#[tokio::test]
async fn test_edit_without_slot_change_skips_the_check() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    let booked = service.book_appointment(&patient(&clinic), request(&clinic, hm(14, 0))).await.unwrap();
    let edited = service
        .update_appointment(
            &receptionist(),
            booked.id,
            UpdateAppointmentRequest {
                notes: Some("Bring previous lab results".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(edited.notes.as_deref(), Some("Bring previous lab results"));
    assert_eq!(edited.reason.as_deref(), Some("Annual check-up"));
    assert_eq!(edited.start_time, hm(14, 0));
}

#[tokio::test]
async fn test_status_lifecycle() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);
    let doctor = TestUser::doctor(clinic.doctor_id).to_user();

    let booked = service.book_appointment(&patient(&clinic), request(&clinic, hm(15, 0))).await.unwrap();

    let confirmed = service
        .update_status(&doctor, booked.id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    // Same status again is a no-op
    let again = service
        .update_status(&doctor, booked.id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(again.status, AppointmentStatus::Confirmed);

    assert_matches!(
        service
            .update_status(&patient(&clinic), booked.id, AppointmentStatus::Completed)
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    service
        .update_status(&doctor, booked.id, AppointmentStatus::Completed)
        .await
        .unwrap();
    assert_matches!(
        service
            .update_status(&receptionist(), booked.id, AppointmentStatus::Cancelled)
            .await,
        Err(AppointmentError::InvalidStatusTransition { .. })
    );
    assert_matches!(
        service
            .update_appointment(
                &receptionist(),
                booked.id,
                UpdateAppointmentRequest {
                    start_time: Some(hm(16, 0)),
                    ..Default::default()
                },
            )
            .await,
        Err(AppointmentError::Validation(_))
    );
}

#[tokio::test]
async fn test_patient_cannot_cancel_past_appointment() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    let past_id = Fixtures::new(&clinic.state.db)
        .appointment(clinic.doctor_id, clinic.patient_id, days_from_today(-2), hm(10, 0), hm(10, 30), "scheduled")
        .await
        .unwrap();

    assert_matches!(
        service
            .update_status(&patient(&clinic), past_id, AppointmentStatus::Cancelled)
            .await,
        Err(AppointmentError::Validation(msg)) if msg == "This appointment can no longer be cancelled"
    );

    assert_matches!(
        service
            .update_status(
                &TestUser::patient(clinic.other_patient_id).to_user(),
                past_id,
                AppointmentStatus::Cancelled
            )
            .await,
        Err(AppointmentError::Forbidden(_))
    );
}

#[tokio::test]
async fn test_search_is_scoped_filtered_and_ordered() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);
    let other = TestUser::patient(clinic.other_patient_id).to_user();

    service.book_appointment(&patient(&clinic), request(&clinic, hm(13, 0))).await.unwrap();
    service.book_appointment(&patient(&clinic), request(&clinic, hm(9, 0))).await.unwrap();
    let theirs = service.book_appointment(&other, request(&clinic, hm(11, 0))).await.unwrap();
    service
        .update_status(&other, theirs.id, AppointmentStatus::Cancelled)
        .await
        .unwrap();

    let own = service
        .search_appointments(&patient(&clinic), AppointmentFilters::default())
        .await
        .unwrap();
    let starts: Vec<NaiveTime> = own.iter().map(|a| a.appointment.start_time).collect();
    assert_eq!(starts, vec![hm(9, 0), hm(13, 0)]);
    assert_eq!(own[0].patient_name, "Jane Doe");
    assert_eq!(own[0].doctor_name, "Dr. Meredith Grey");

    let everything = service
        .search_appointments(&receptionist(), AppointmentFilters::default())
        .await
        .unwrap();
    assert_eq!(everything.len(), 3);

    let cancelled = service
        .search_appointments(
            &TestUser::doctor(clinic.doctor_id).to_user(),
            AppointmentFilters {
                status: Some(AppointmentStatus::Cancelled),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].appointment.id, theirs.id);
    assert_eq!(cancelled[0].patient_name, "John Roe");

    let other_doctor = service
        .search_appointments(&TestUser::doctor(clinic.doctor_id + 1).to_user(), AppointmentFilters::default())
        .await
        .unwrap();
    assert!(other_doctor.is_empty());

    let paged = service
        .search_appointments(
            &receptionist(),
            AppointmentFilters {
                limit: Some(1),
                offset: Some(1),
                date_from: Some(clinic.monday),
                date_to: Some(clinic.monday),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].appointment.start_time, hm(11, 0));
}

#[tokio::test]
async fn test_delete_is_staff_only() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    let booked = service.book_appointment(&patient(&clinic), request(&clinic, hm(16, 0))).await.unwrap();

    assert_matches!(
        service.delete_appointment(&patient(&clinic), booked.id).await,
        Err(AppointmentError::Forbidden(_))
    );
    service.delete_appointment(&receptionist(), booked.id).await.unwrap();
    assert_matches!(
        service.get_appointment(&receptionist(), booked.id).await,
        Err(AppointmentError::NotFound)
    );
    assert_matches!(
        service.delete_appointment(&receptionist(), booked.id).await,
        Err(AppointmentError::NotFound)
    );
}

#[tokio::test]
async fn test_validate_booking_reports_reason() {
    let clinic = clinic().await;
    let service = AppointmentBookingService::new(&clinic.state);

    let booked = service.book_appointment(&patient(&clinic), request(&clinic, hm(10, 0))).await.unwrap();

    let taken = service
        .validate_booking(clinic.doctor_id, clinic.monday, hm(10, 0), None)
        .await
        .unwrap();
    assert!(!taken.available);

    let own_slot = service
        .validate_booking(clinic.doctor_id, clinic.monday, hm(10, 0), Some(booked.id))
        .await
        .unwrap();
    assert!(own_slot.available);

    assert_matches!(
        service.validate_booking(404, clinic.monday, hm(10, 0), None).await,
        Err(AppointmentError::DoctorNotFound)
    );
}

#[tokio::test]
async fn test_concurrent_bookings_store_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("clinic.db").display());
    let clinic = clinic_on(Database::connect_with(&url, 4).await.unwrap()).await;

    let attempts = (0..8).map(|i| {
        let state = clinic.state.clone();
        let patient_id = if i % 2 == 0 { clinic.patient_id } else { clinic.other_patient_id };
        let request = request(&clinic, hm(10, 0));
        tokio::spawn(async move {
            let user = TestUser::patient(patient_id).to_user();
            AppointmentBookingService::new(&state).book_appointment(&user, request).await
        })
    });

    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let booked = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(booked, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppointmentError::SlotUnavailable(_))));

    let stored = AppointmentBookingService::new(&clinic.state)
        .search_appointments(&receptionist(), AppointmentFilters::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}
