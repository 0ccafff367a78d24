use crate::core::grade::Grade;
use crate::models::{Enrollment, PersonRecord, School, Student};

/// Check if a person record carries the target enrollment class
///
/// Persons without a grade are never eligible, whatever their enrollment.
#[inline]
pub fn matches_enrollment(record: &PersonRecord, target: Enrollment) -> bool {
    record.grade.is_some() && record.enrollment == Some(target)
}

/// Check if a school offers the student's grade
#[inline]
pub fn school_offers_grade(school: &School, grade: Grade) -> bool {
    school.grades.contains(grade)
}

/// Check if a school belongs to a jurisdiction scope
///
/// `None` is the region-wide scope and matches every school.
#[inline]
pub fn school_in_scope(school: &School, scope: Option<&str>) -> bool {
    scope.map_or(true, |jurisdiction| school.jurisdiction == jurisdiction)
}

/// Check if a student belongs to a jurisdiction scope
#[inline]
pub fn student_in_scope(student: &Student, scope: Option<&str>) -> bool {
    scope.map_or(true, |jurisdiction| student.jurisdiction == jurisdiction)
}

/// Students whose grade is offered by at least one of the schools
///
/// A student outside this set cannot be placed in the scope no matter how
/// capacity is handled.
pub fn placeable_students<'a>(
    students: &'a [Student],
    schools: &'a [School],
) -> impl Iterator<Item = &'a Student> + 'a {
    students
        .iter()
        .filter(move |student| schools.iter().any(|school| school_offers_grade(school, student.grade)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grade::GradeRange;
    use crate::models::{Location, Sex};

    fn create_test_school(jurisdiction: &str, lower: Grade, upper: Grade) -> School {
        School {
            id: format!("{}-school", jurisdiction),
            jurisdiction: jurisdiction.to_string(),
            location: Location::new(41.14, -104.82),
            grades: GradeRange::new(lower, upper).unwrap(),
            capacity: 100.0,
        }
    }

    fn create_test_student(id: u64, grade: Grade, jurisdiction: &str) -> Student {
        Student {
            id,
            grade,
            location: Location::new(41.13, -104.81),
            jurisdiction: jurisdiction.to_string(),
        }
    }

    fn create_test_record(age: u8, enrollment: Option<Enrollment>) -> PersonRecord {
        PersonRecord {
            id: 1,
            household_id: "hh-1".to_string(),
            age,
            sex: Sex::Female,
            grade: Grade::for_age(age),
            enrollment,
            employed: false,
            school_id: None,
        }
    }

    #[test]
    fn test_matches_enrollment() {
        let record = create_test_record(9, Some(Enrollment::Public));
        assert!(matches_enrollment(&record, Enrollment::Public));
        assert!(!matches_enrollment(&record, Enrollment::Private));
    }

    #[test]
    fn test_unsampled_record_is_not_eligible() {
        let record = create_test_record(9, None);
        assert!(!matches_enrollment(&record, Enrollment::Public));

        let adult = create_test_record(30, Some(Enrollment::Public));
        assert!(!matches_enrollment(&adult, Enrollment::Public));
    }

    #[test]
    fn test_school_offers_grade() {
        let school = create_test_school("56021", Grade::K, Grade::Fifth);
        assert!(school_offers_grade(&school, Grade::K));
        assert!(school_offers_grade(&school, Grade::Fifth));
        assert!(!school_offers_grade(&school, Grade::PreK));
        assert!(!school_offers_grade(&school, Grade::Sixth));
    }

    #[test]
    fn test_scope_filters() {
        let school = create_test_school("56021", Grade::K, Grade::Fifth);
        let student = create_test_student(1, Grade::First, "56001");

        assert!(school_in_scope(&school, None));
        assert!(school_in_scope(&school, Some("56021")));
        assert!(!school_in_scope(&school, Some("56001")));
        assert!(student_in_scope(&student, Some("56001")));
        assert!(student_in_scope(&student, None));
    }

    #[test]
    fn test_placeable_students() {
        let schools = vec![create_test_school("56021", Grade::K, Grade::Fifth)];
        let students = vec![
            create_test_student(1, Grade::First, "56021"),
            create_test_student(2, Grade::PreK, "56021"),
        ];

        let placeable: Vec<u64> = placeable_students(&students, &schools).map(|s| s.id).collect();
        assert_eq!(placeable, vec![1]);
    }
}
